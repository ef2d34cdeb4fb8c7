use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::{CurationError, Result};

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CurationError + '_ {
    move |source| CurationError::Io { path: path.to_path_buf(), source }
}

/// Reads JSON Lines, or a single top-level JSON array. Blank lines are skipped.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = BufReader::new(File::open(path).map_err(io_err(path))?);

    if starts_with_array(&mut reader).map_err(io_err(path))? {
        let mut buf = String::new();
        reader.read_to_string(&mut buf).map_err(io_err(path))?;
        return serde_json::from_str(&buf).map_err(|source| CurationError::Parse {
            path: path.to_path_buf(),
            line: source.line(),
            source,
        });
    }

    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err(path))?;
        if line.trim().is_empty() {
            continue;
        }
        let rec = serde_json::from_str(&line).map_err(|source| CurationError::Parse {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        out.push(rec);
    }
    Ok(out)
}

fn starts_with_array(reader: &mut BufReader<File>) -> std::io::Result<bool> {
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            return Ok(false);
        }
        match buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(pos) => return Ok(buf[pos] == b'['),
            None => {
                let n = buf.len();
                reader.consume(n);
            }
        }
    }
}

/// Writes one JSON object per line via a temp file + rename. Returns the row count.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
    }

    let tmp = tmp_path(path);
    {
        let f = File::create(&tmp).map_err(io_err(&tmp))?;
        let mut w = BufWriter::new(f);
        for rec in records {
            serde_json::to_writer(&mut w, rec)?;
            w.write_all(b"\n").map_err(io_err(&tmp))?;
        }
        w.flush().map_err(io_err(&tmp))?;
    }
    std::fs::rename(&tmp, path).map_err(io_err(path))?;
    Ok(records.len())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
