use std::path::{Path, PathBuf};

pub trait PathExt {
    /// Return a new `PathBuf` with all existing extensions removed and
    /// replaced with `new_ext`.
    ///
    /// ex: "foo.tar.gz" with `new_ext="zip"` becomes "foo.zip"
    fn with_all_extensions(&self, new_ext: &str) -> PathBuf;
}

impl PathExt for Path {
    fn with_all_extensions(&self, new_ext: &str) -> PathBuf {
        let mut path = self.to_path_buf();
        while path.extension().is_some() {
            path.set_extension("");
        }
        path.set_extension(new_ext);
        path
    }
}
