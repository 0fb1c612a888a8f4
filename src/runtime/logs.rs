// Per-alias log files (<home>/logs/<alias>.log)

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::errors::Result;

const MAX_PREALLOCATED_LINES: usize = 1024;

#[derive(Debug, Clone)]
pub struct LogSink {
    dir: PathBuf,
}

impl LogSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, alias: &str) -> PathBuf {
        self.dir.join(format!("{}.log", alias))
    }

    /// Open the alias log in append mode, creating directories as needed
    pub fn open_append(&self, alias: &str) -> Result<File> {
        fs::create_dir_all(&self.dir)?;
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(alias))?)
    }

    /// Last `lines` lines of the alias log (empty if there is no log yet)
    pub fn tail(&self, alias: &str, lines: usize) -> Result<Vec<String>> {
        tail_file(&self.path(alias), lines)
    }
}

fn tail_file(path: &Path, lines: usize) -> Result<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    // Child output is raw bytes; undecodable lines are kept lossily
    let mut window = std::collections::VecDeque::with_capacity(lines.min(MAX_PREALLOCATED_LINES));
    for line in BufReader::new(file).split(b'\n') {
        let mut line = line?;
        if lines == 0 {
            continue;
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if window.len() == lines {
            window.pop_front();
        }
        window.push_back(String::from_utf8_lossy(&line).into_owned());
    }
    Ok(window.into_iter().collect())
}
