//! Input discovery and conversion of a single container to a JSON file.

use anyhow::Context;
use jwalk::WalkDir;
use pst_decoder::{
    messaging::{
        record::MessageRecord,
        store::Store,
        walker::{WalkOptions, Walker},
    },
    ndb::node_id::NID_ROOT_FOLDER,
    PstFile,
};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

use crate::export;

/// A container and the directory its JSON output goes to.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Job {
    pub input: PathBuf,
    pub output_dir: PathBuf,
}

impl Job {
    /// `<output_dir>/<stem>.json`
    pub fn output_file(&self) -> PathBuf {
        let stem = self
            .input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.output_dir.join(format!("{stem}.json"))
    }
}

/// A single file converts into `output_dir` directly. A directory is walked recursively and
/// each file's parent directory is mirrored below `output_dir`.
pub fn discover(pst_dir: &Path, output_dir: &Path) -> anyhow::Result<Vec<Job>> {
    if pst_dir.is_file() {
        return Ok(vec![Job {
            input: pst_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
        }]);
    }

    let mut jobs = Vec::new();
    for entry in WalkDir::new(pst_dir).sort(true).skip_hidden(false) {
        let entry = entry.with_context(|| format!("walking {}", pst_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let input = entry.path();
        let relative = input
            .parent()
            .and_then(|parent| parent.strip_prefix(pst_dir).ok())
            .with_context(|| format!("{} is outside {}", input.display(), pst_dir.display()))?;
        jobs.push(Job {
            output_dir: output_dir.join(relative),
            input,
        });
    }
    Ok(jobs)
}

#[derive(Clone, Copy, Debug)]
pub struct ConvertOptions {
    pub walk: WalkOptions,
    pub pretty: bool,
}

#[derive(Clone, Default, Debug)]
pub struct Summary {
    pub store_name: Option<String>,
    pub messages: usize,
    pub diagnostics: usize,
    /// `None` when the container had no messages and nothing was written.
    pub output: Option<PathBuf>,
}

/// Open a container, project every reachable message and write the records as one JSON array.
pub fn convert(job: &Job, options: ConvertOptions) -> anyhow::Result<Summary> {
    let pst = PstFile::open(&job.input)
        .with_context(|| format!("opening {}", job.input.display()))?;

    let store_name = match Store::read(&pst).and_then(|store| store.display_name()) {
        Ok(name) => Some(name),
        Err(err) => {
            warn!(input = %job.input.display(), %err, "store has no display name");
            None
        }
    };

    let mut walker = Walker::new(&pst, NID_ROOT_FOLDER, options.walk);
    let records: Vec<_> = walker
        .by_ref()
        .map(|(path, message)| {
            debug!(input = %job.input.display(), path = %path, node = ?message.node_id(), "exporting message");
            MessageRecord::project(&message)
        })
        .collect();
    let diagnostics = walker.diagnostics().len()
        + records
            .iter()
            .map(|record| record.diagnostics.len())
            .sum::<usize>();

    let mut summary = Summary {
        store_name,
        messages: records.len(),
        diagnostics,
        output: None,
    };
    if records.is_empty() {
        return Ok(summary);
    }

    fs::create_dir_all(&job.output_dir)
        .with_context(|| format!("creating {}", job.output_dir.display()))?;
    let output = job.output_file();
    let file = File::create(&output).with_context(|| format!("creating {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    export::write_records(&mut writer, &records, options.pretty)
        .with_context(|| format!("writing {}", output.display()))?;
    writer
        .flush()
        .with_context(|| format!("writing {}", output.display()))?;

    summary.output = Some(output);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_file() {
        let job = Job {
            input: PathBuf::from("in/archive/2020.backup.pst"),
            output_dir: PathBuf::from("out/archive"),
        };
        assert_eq!(
            job.output_file(),
            PathBuf::from("out/archive/2020.backup.json")
        );
    }

    #[test]
    fn test_discover_mirrors_directories() {
        let input = tempfile::tempdir().unwrap();
        fs::create_dir_all(input.path().join("nested/deeper")).unwrap();
        fs::write(input.path().join("a.pst"), b"").unwrap();
        fs::write(input.path().join("nested/deeper/b.ost"), b"").unwrap();

        let jobs = discover(input.path(), Path::new("out")).unwrap();
        assert_eq!(
            jobs,
            [
                Job {
                    input: input.path().join("a.pst"),
                    output_dir: PathBuf::from("out"),
                },
                Job {
                    input: input.path().join("nested/deeper/b.ost"),
                    output_dir: PathBuf::from("out/nested/deeper"),
                },
            ]
        );
    }

    #[test]
    fn test_discover_single_file() {
        let input = tempfile::tempdir().unwrap();
        let file = input.path().join("mail.pst");
        fs::write(&file, b"").unwrap();

        let jobs = discover(&file, Path::new("out")).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].output_file(), PathBuf::from("out/mail.json"));
    }
}
