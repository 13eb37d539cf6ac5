use crate::store::Store;
use anyhow::{Context, Result};
use std::path::PathBuf;

pub fn run(store: &Store, path: Option<PathBuf>) -> Result<()> {
    if let Some(p) = path {
        let abs_path = std::fs::canonicalize(&p).context("Failed to resolve path")?;
        anyhow::ensure!(abs_path.is_dir(), "{:?} is not a directory", abs_path);
        store.set_root(&abs_path)?;
        println!("Synchronized directory: {:?}", abs_path);
    } else {
        match store.root()? {
            Some(root) => println!("{}", root.display()),
            None => println!("No synchronized directory configured."),
        }
    }
    Ok(())
}
