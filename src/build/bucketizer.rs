//! Bucketization: the scatter half of the external sort
//!
//! One bucketizer job owns one bucket of input files. It streams every
//! raw overlap, builds the mirrored counterpart, filters both directions,
//! and appends each survivor to the slice-partition file chosen by *that*
//! direction's a-read: the read the record will be keyed by in the
//! finished store.
//!
//! All output lands in `bucketNNNN.WORKING/`; when the job is done the
//! directory is renamed to `bucketNNNN` in one atomic step. That rename
//! is the only completion signal: a rerun that finds the renamed
//! directory exits without writing anything, and a rerun that finds a
//! stale `.WORKING` directory refuses to proceed unless forced.

use std::fs;
use std::io::BufWriter;
use std::path::Path;

use log::info;

use crate::error::{BuildError, Result, WriteError};
use crate::names;
use crate::overlap::{encode_evalue, Overlap};
use crate::ovl::{OvlFileReader, OvlFileWriter, OvlFileWriterBuilder, RecordKind};
use crate::plan::PartitionPlan;

use super::{write_slice_sizes, JobOutcome};

/// Settings for one bucketizer job.
#[derive(Debug, Clone)]
pub struct BucketizeConfig {
    /// Bucket number this job owns
    pub bucket: u32,
    /// Overlaps with a worse error rate are dropped
    pub max_erate: f64,
    /// Restart a job that crashed mid-run
    pub force: bool,
}

impl BucketizeConfig {
    /// Defaults: keep every error rate, no force
    #[must_use]
    pub fn new(bucket: u32) -> Self {
        Self {
            bucket,
            max_erate: 1.0,
            force: false,
        }
    }
}

/// Runs one bucketizer job against a planned store directory.
pub fn bucketize(store: &Path, plan: &PartitionPlan, config: &BucketizeConfig) -> Result<JobOutcome> {
    let bucket = config.bucket;
    let done_dir = names::bucket_dir(store, bucket);
    let working_dir = names::bucket_working_dir(store, bucket);

    // The rename is the completion signal; an existing done directory
    // means a previous run finished and this one has nothing to do.
    if done_dir.is_dir() {
        info!("bucket {bucket}: already bucketized, nothing to do");
        return Ok(JobOutcome::AlreadyDone);
    }

    if working_dir.is_dir() {
        if !config.force {
            return Err(BuildError::CrashedRun(format!("bucket{bucket:04}")).into());
        }
        info!("bucket {bucket}: removing stale working directory");
        fs::remove_dir_all(&working_dir)?;
    }

    fs::create_dir_all(&working_dir)?;

    let max_evalue = encode_evalue(config.max_erate);
    let num_slices = plan.num_slices();
    let layout = plan.layout();

    let mut writers: Vec<Option<OvlFileWriter<BufWriter<fs::File>>>> =
        (0..num_slices).map(|_| None).collect();
    let mut slice_sizes = vec![0u64; num_slices as usize];

    let mut seen = 0u64;
    let mut skipped = 0u64;

    for input in plan.files_in_bucket(bucket) {
        info!("bucket {bucket}: bucketizing '{}'", input.display());

        let mut reader = OvlFileReader::open_expecting(input, layout)?;
        let mut ovl = Overlap::default();

        while reader.read_overlap(&mut ovl)? {
            seen += 1;

            if ovl.a_id == 0
                || ovl.b_id == 0
                || ovl.a_id > plan.max_id()
                || ovl.b_id > plan.max_id()
            {
                return Err(WriteError::IdOutOfRange {
                    a: ovl.a_id,
                    b: ovl.b_id,
                    max: plan.max_id(),
                }
                .into());
            }

            // Each direction is filtered and routed on its own.
            for dir in [ovl, ovl.mirrored()] {
                if !keep(&dir, max_evalue) {
                    skipped += 1;
                    continue;
                }
                let slice = plan.slice_for_read(dir.a_id);
                let writer = match &mut writers[slice as usize] {
                    Some(writer) => writer,
                    none => none.insert(
                        OvlFileWriterBuilder::default()
                            .kind(RecordKind::Full)
                            .layout(layout)
                            .compressed(true)
                            .create(names::slice_file(&working_dir, slice))?,
                    ),
                };
                writer.write_overlap(&dir)?;
                slice_sizes[slice as usize] += 1;
            }
        }
    }

    for writer in writers.iter_mut().flatten() {
        writer.finish()?;
    }

    write_slice_sizes(&names::slice_sizes(&working_dir), &slice_sizes)?;

    // Publish atomically; everything before this is invisible to the
    // sorter jobs.
    fs::rename(&working_dir, &done_dir)?;

    info!(
        "bucket {bucket}: routed {} overlaps from {seen} records ({skipped} directions filtered)",
        slice_sizes.iter().sum::<u64>()
    );
    Ok(JobOutcome::Built)
}

/// Quality/usage filter applied to each direction independently
fn keep(ovl: &Overlap, max_evalue: u16) -> bool {
    if ovl.evalue > max_evalue {
        return false;
    }
    ovl.for_utg || ovl.for_obt || ovl.for_dup
}
