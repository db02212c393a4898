use std::io;
use std::path::{Path, PathBuf};

/// Extension of a compiled (postcard) n-gram model.
pub(crate) const COMPILED_EXTENSION: &str = "bin";

/// Reads a training corpus: one sentence per line, blank lines skipped.
pub(crate) fn read_corpus<P: AsRef<Path>>(path: P) -> io::Result<Vec<String>> {
	let contents = std::fs::read_to_string(path)?;
	Ok(contents
		.lines()
		.filter(|line| !line.trim().is_empty())
		.map(str::to_owned)
		.collect())
}

pub(crate) fn is_compiled_model(path: &Path) -> bool {
	path.extension().is_some_and(|ext| ext == COMPILED_EXTENSION)
}

/// Where the compiled model of a corpus is cached.
///
/// `data/corpus.txt` → `data/corpus.bin`
pub(crate) fn compiled_model_path(corpus: &Path) -> io::Result<PathBuf> {
	if corpus.file_stem().is_none() {
		return Err(io::Error::new(io::ErrorKind::InvalidInput, "corpus path has no file name"));
	}
	Ok(corpus.with_extension(COMPILED_EXTENSION))
}

/// Name shown in logs for a model path: the file stem, or the whole path.
pub(crate) fn model_name(path: &Path) -> String {
	match path.file_stem() {
		Some(stem) => stem.to_string_lossy().into_owned(),
		None => path.display().to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn compiled_model_sits_next_to_its_corpus() {
		let out = compiled_model_path(Path::new("data/corpus.txt")).unwrap();
		assert_eq!(out, PathBuf::from("data/corpus.bin"));
		assert!(is_compiled_model(&out));
		assert!(compiled_model_path(Path::new("")).is_err());
	}

	#[test]
	fn model_name_is_the_file_stem() {
		assert_eq!(model_name(Path::new("./data/cats.bin")), "cats");
		assert_eq!(model_name(Path::new("")), "");
	}

	#[test]
	fn blank_corpus_lines_are_skipped() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("corpus.txt");
		std::fs::write(&path, "first line\n\n   \nsecond line\r\n").unwrap();
		assert_eq!(read_corpus(&path).unwrap(), vec!["first line", "second line"]);
	}
}
