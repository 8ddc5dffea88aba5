//! On-disk naming scheme for the store directory
//!
//! Every component addresses files through these helpers so the layout
//! lives in exactly one place:
//!
//! ```text
//! store/
//!   plan  info  index  evalues  statistics
//!   bucketNNNN/{sliceNNNN, sliceSizes}     (bucketNNNN.WORKING while in flight)
//!   SSSS-PPP  SSSS.info  SSSS.index  SSSS.statistics  SSSS.sorting
//! ```

use std::path::{Path, PathBuf};

pub fn plan(store: &Path) -> PathBuf {
    store.join("plan")
}

pub fn info(store: &Path) -> PathBuf {
    store.join("info")
}

pub fn index(store: &Path) -> PathBuf {
    store.join("index")
}

pub fn evalues(store: &Path) -> PathBuf {
    store.join("evalues")
}

pub fn statistics(store: &Path) -> PathBuf {
    store.join("statistics")
}

pub fn bucket_dir(store: &Path, bucket: u32) -> PathBuf {
    store.join(format!("bucket{bucket:04}"))
}

pub fn bucket_working_dir(store: &Path, bucket: u32) -> PathBuf {
    store.join(format!("bucket{bucket:04}.WORKING"))
}

pub fn slice_file(bucket_dir: &Path, slice: u32) -> PathBuf {
    bucket_dir.join(format!("slice{slice:04}"))
}

pub fn slice_sizes(bucket_dir: &Path) -> PathBuf {
    bucket_dir.join("sliceSizes")
}

pub fn piece(store: &Path, slice: u32, piece: u32) -> PathBuf {
    store.join(format!("{slice:04}-{piece:03}"))
}

pub fn slice_info(store: &Path, slice: u32) -> PathBuf {
    store.join(format!("{slice:04}.info"))
}

pub fn slice_index(store: &Path, slice: u32) -> PathBuf {
    store.join(format!("{slice:04}.index"))
}

pub fn slice_statistics(store: &Path, slice: u32) -> PathBuf {
    store.join(format!("{slice:04}.statistics"))
}

pub fn sorting_sentinel(store: &Path, slice: u32) -> PathBuf {
    store.join(format!("{slice:04}.sorting"))
}

/// Counts sidecar accompanying a producer overlap file
pub fn counts_sidecar(ovl_file: &Path) -> PathBuf {
    let mut name = ovl_file.as_os_str().to_owned();
    name.push(".counts");
    PathBuf::from(name)
}
