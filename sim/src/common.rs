//! Logger setup and path handling shared by the `bip-sim` subcommands.

use std::error::Error;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::LevelFilter;

/// Suffix of the files written by a replay, excluded when scanning for traces.
pub const PREDICTION_SUFFIX: &str = "_prediction.csv";

/// Route `log` output to stderr, or append it to `log_file`.
///
/// Lines carry a local timestamp, the level and the emitting module, so estimator ticks
/// (`bip::estimator`) can be told apart from replay progress (`bip_sim::replay`).
/// An unknown `log_level` falls back to `info`.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let level = log_level.parse::<LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Unknown log level '{log_level}', using 'info'");
        LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        ensure_parent(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}

/// Create the parent directory of `path` if it has one.
pub fn ensure_parent(path: &Path) -> Result<(), Box<dyn Error>> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// Trace directories and observed traces must exist before anything is loaded.
pub fn validate_input_path(input: &Path) -> Result<(), Box<dyn Error>> {
    match fs::metadata(input) {
        Ok(meta) if meta.is_file() || meta.is_dir() => Ok(()),
        Ok(_) => Err(format!("'{}' is not a trace file or directory", input.display()).into()),
        Err(e) => Err(format!("cannot read '{}': {e}", input.display()).into()),
    }
}

/// Get the traces to replay from a path.
///
/// A single file is taken as is, whatever its name. From a directory every file whose name
/// starts with `prefix` is taken, sorted by name, except earlier replay output.
///
/// # Errors
/// Returns an error if the directory holds no matching file or the path is neither a file nor
/// a directory.
pub fn get_trace_files(input: &Path, prefix: &str) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    if input.is_file() {
        Ok(vec![input.to_path_buf()])
    } else if input.is_dir() {
        let mut traces: Vec<PathBuf> = fs::read_dir(input)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|s| s.to_str())
                        .is_some_and(|name| {
                            name.starts_with(prefix) && !name.ends_with(PREDICTION_SUFFIX)
                        })
            })
            .collect();

        if traces.is_empty() {
            return Err(format!(
                "No '{}*' traces found in directory '{}'.",
                prefix,
                input.display()
            )
            .into());
        }

        traces.sort();
        Ok(traces)
    } else {
        Err(format!(
            "Input path '{}' is neither a file nor a directory.",
            input.display()
        )
        .into())
    }
}

/// Create the prediction output directory.
pub fn ensure_dir(dir: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Output file for a replayed trace: `<output>/<input stem>_prediction.csv`.
pub fn prediction_path(input_file: &Path, output: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let stem = input_file
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| format!("Input file path '{}' has no filename", input_file.display()))?;
    Ok(output.join(format!("{stem}{PREDICTION_SUFFIX}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn test_validate_input_path_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("trace_0.out");
        File::create(&file_path).unwrap();

        assert!(validate_input_path(&file_path).is_ok());
    }

    #[test]
    fn test_validate_input_path_directory() {
        let dir = tempdir().unwrap();
        assert!(validate_input_path(dir.path()).is_ok());
    }

    #[test]
    fn test_validate_input_path_nonexistent() {
        let result = validate_input_path(Path::new("/nonexistent/path"));
        assert!(result.is_err());
    }

    #[test]
    fn test_get_trace_files_single_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("held_out.log");
        File::create(&file_path).unwrap();

        let result = get_trace_files(&file_path, "trace").unwrap();
        assert_eq!(result, vec![file_path]);
    }

    #[test]
    fn test_get_trace_files_directory() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("trace_b.out")).unwrap();
        File::create(dir.path().join("trace_a.out")).unwrap();
        File::create(dir.path().join("trace_a_prediction.csv")).unwrap();
        File::create(dir.path().join("readme.txt")).unwrap();

        let result = get_trace_files(dir.path(), "trace").unwrap();
        assert_eq!(result.len(), 2);
        assert!(result[0].ends_with("trace_a.out"));
        assert!(result[1].ends_with("trace_b.out"));
    }

    #[test]
    fn test_get_trace_files_empty_directory() {
        let dir = tempdir().unwrap();
        assert!(get_trace_files(dir.path(), "trace").is_err());
    }

    #[test]
    fn test_ensure_dir_and_parent() {
        let dir = tempdir().unwrap();
        let new_dir = dir.path().join("predictions");
        assert!(!new_dir.exists());
        ensure_dir(&new_dir).unwrap();
        assert!(new_dir.is_dir());

        let nested = dir.path().join("curves/run_1/mean.csv");
        ensure_parent(&nested).unwrap();
        assert!(dir.path().join("curves/run_1").is_dir());
        ensure_parent(Path::new("mean.csv")).unwrap();
    }

    #[test]
    fn test_prediction_path() {
        let path =
            prediction_path(Path::new("/data/trace_07.out"), Path::new("/tmp/out")).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/out/trace_07_prediction.csv"));
    }
}
