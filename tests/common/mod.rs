//! Integration test helpers for fsbatch
//!
//! These tests verify end-to-end behavior by opening a real engine over a
//! temporary directory and driving it through the public API.

use fsbatch::{Engine, EngineConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// An engine rooted in a temp directory plus a scratch workspace to
/// mutate. The TempDir must outlive the engine.
#[allow(unused)]
pub struct TestEngine {
    pub temp: TempDir,
    pub engine: Engine,
    pub work: PathBuf,
}

#[allow(unused)]
pub fn test_engine() -> TestEngine {
    let _ = env_logger::builder().is_test(true).try_init();

    let temp = TempDir::new().unwrap();
    let config = EngineConfig::new(temp.path().join("data"));
    let engine = Engine::open(config).unwrap();

    let work = temp.path().join("work");
    fs::create_dir_all(&work).unwrap();

    TestEngine { temp, engine, work }
}

/// Creates `count` files named `prefix{i}.{ext}` under `dir` and returns
/// their paths in creation order.
#[allow(unused)]
pub fn make_files(dir: &Path, prefix: &str, ext: &str, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("{prefix}{i}.{ext}"));
            fs::write(&path, format!("contents of {prefix}{i}")).unwrap();
            path
        })
        .collect()
}
