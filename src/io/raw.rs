//! Read / write float arrays as headerless little-endian `f32`

pub fn write(data: impl Iterator<Item = f32>, path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let mut buf = BufWriter::new(file);
    for datum in data {
        buf.write_all(&datum.to_le_bytes())?;
    }
    buf.flush()
}

type IORes<T> = io::Result<T>;
pub fn read<'a>(path: &Path) -> IORes<impl Iterator<Item = IORes<f32>> + 'a> {
    let file = File::open(path)?;
    let mut buf = BufReader::new(file);
    let mut buffer = [0; 4];

    Ok(std::iter::from_fn(move || {
        use std::io::ErrorKind::UnexpectedEof;
        match buf.read_exact(&mut buffer) {
            Ok(()) => Some(Ok(f32::from_le_bytes(buffer))),
            Err(e) if e.kind() == UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn raw_io_roundtrip() -> std::io::Result<()> {
        use tempfile::tempdir;
        #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

        let dir = tempdir()?;
        let file_path = dir.path().join("test.raw");
        let original_data = vec![1.23, -4.56, 7.89, 0.0];
        write(original_data.iter().copied(), &file_path)?;
        let reloaded_data: Vec<_> = read(&file_path)?
            .collect::<Result<_, _>>()?;
        assert_eq!(original_data, reloaded_data);
        // Four bytes per value, no header
        assert_eq!(std::fs::metadata(&file_path)?.len(), 16);
        Ok(())
    }

    #[test]
    fn trailing_partial_value_is_ignored() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let file_path = dir.path().join("short.raw");
        let mut bytes = 2.5_f32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0, 1]);
        std::fs::write(&file_path, bytes)?;
        let values: Vec<f32> = read(&file_path)?.collect::<Result<_, _>>()?;
        assert_eq!(values, vec![2.5]);
        Ok(())
    }
}

// ----- Imports ------------------------------------------------------------------------------------------
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
