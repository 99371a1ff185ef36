use ahash::AHashMap;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dupe_sieve_core::FileRecord;
use glob::Pattern;
use rayon::prelude::*;
use std::fs::{self, File};
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use twox_hash::XxHash64;
use walkdir::WalkDir;

const FINGERPRINT_LENGTH: usize = 1024; // 1KB

#[derive(Debug, Clone)]
struct ScannedFile {
    path: PathBuf,
    size: u64,
    mtime: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Hashes {
    fingerprint: Option<u64>,
    strong: Option<String>,
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    for dir in dirs {
        let dir_path = Path::new(&dir);
        if result.iter().any(|kept| dir_path.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !Path::new(kept).starts_with(dir_path));
        result.push(dir);
    }
    result
}

fn compile_patterns(ignore_globs: &[String]) -> Vec<Pattern> {
    ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

/// Walk every root in parallel and bucket regular, non-empty files by size.
/// Symlinks are not followed; unreadable entries are logged and skipped.
fn build_size_to_files_map(
    root_paths: &[String],
    ignore_patterns: &[Pattern],
) -> DashMap<u64, Vec<ScannedFile>> {
    let map: DashMap<u64, Vec<ScannedFile>> = DashMap::new();
    let ignored = |path: &Path| ignore_patterns.iter().any(|p| p.matches_path(path));

    root_paths.par_iter().for_each(|root| {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !ignored(entry.path()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry under {}: {}", root, err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("Error getting metadata for {}: {}", entry.path().display(), err);
                    continue;
                }
            };
            if metadata.len() == 0 {
                continue;
            }
            let mtime = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
            map.entry(metadata.len()).or_default().push(ScannedFile {
                path: entry.into_path(),
                size: metadata.len(),
                mtime,
            });
        }
    });

    map
}

fn read_portion(file: &Path) -> io::Result<Vec<u8>> {
    let mut f = File::open(file)?;
    let mut buffer = vec![0; FINGERPRINT_LENGTH];
    let bytes_read = f.read(&mut buffer)?;
    buffer.truncate(bytes_read);
    Ok(buffer)
}

fn fingerprint(file: &Path) -> io::Result<u64> {
    let data = read_portion(file)?;
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&data);
    Ok(hasher.finish())
}

fn strong_hash(file: &Path) -> io::Result<String> {
    let mut f = File::open(file)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut f, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Two tiers: a 1KB fingerprint for every file whose size collides, then a
/// full strong hash only where fingerprints collide too.
fn hash_same_size(files: &[ScannedFile]) -> Vec<Hashes> {
    if files.len() < 2 {
        return files.iter().map(|_| Hashes::default()).collect();
    }
    let fingerprints: Vec<Option<u64>> = files
        .par_iter()
        .map(|file| match fingerprint(&file.path) {
            Ok(fp) => Some(fp),
            Err(e) => {
                error!("Error processing file '{}': {}", file.path.display(), e);
                None
            }
        })
        .collect();

    let mut counts: AHashMap<u64, usize> = AHashMap::new();
    for fp in fingerprints.iter().flatten() {
        *counts.entry(*fp).or_default() += 1;
    }

    files
        .par_iter()
        .zip(fingerprints.par_iter())
        .map(|(file, &fp)| {
            let strong = match fp {
                Some(fp) if counts.get(&fp).copied().unwrap_or(0) > 1 => {
                    match strong_hash(&file.path) {
                        Ok(hash) => Some(hash),
                        Err(e) => {
                            error!("Error processing file '{}': {}", file.path.display(), e);
                            None
                        }
                    }
                }
                _ => None,
            };
            Hashes {
                fingerprint: fp,
                strong,
            }
        })
        .collect()
}

/// Scan `root_paths` into file records with ids assigned in path order.
pub fn scan(root_paths: &[String], ignore_globs: &[String], hash: bool) -> Result<Vec<FileRecord>> {
    let roots = non_overlapping_directories(root_paths.to_vec());
    if roots.is_empty() {
        bail!("No root paths to scan; pass paths or set root_paths in the configuration");
    }
    for root in &roots {
        if !Path::new(root).is_dir() {
            bail!("Root path {} is not a directory", root);
        }
    }
    info!("Processing directories: {:?}", roots);

    let patterns = compile_patterns(ignore_globs);
    let size_to_files = build_size_to_files_map(&roots, &patterns);
    debug!("{} distinct sizes", size_to_files.len());

    let mut scanned: Vec<(ScannedFile, Hashes)> = size_to_files
        .into_iter()
        .collect::<Vec<_>>()
        .into_par_iter()
        .flat_map_iter(|(_, files)| {
            let hashes = if hash {
                hash_same_size(&files)
            } else {
                files.iter().map(|_| Hashes::default()).collect()
            };
            files.into_iter().zip(hashes)
        })
        .collect();
    scanned.sort_by(|(a, _), (b, _)| a.path.cmp(&b.path));

    let records = scanned
        .into_iter()
        .enumerate()
        .map(|(n, (file, hashes))| {
            let mut record = FileRecord::new(
                n as i64 + 1,
                file.path.to_string_lossy(),
                i64::try_from(file.size).unwrap_or(i64::MAX),
                file.mtime,
            );
            if let Some(fp) = hashes.fingerprint {
                record = record.with_fast_fingerprint(fp);
            }
            if let Some(strong) = hashes.strong {
                record = record.with_strong_hash(strong);
            }
            record
        })
        .collect::<Vec<_>>();

    let hashed = records.iter().filter(|r| r.strong_hash.is_some()).count();
    info!("Scanned {} files, {} with a strong hash", records.len(), hashed);
    Ok(records)
}

/// Canonical form of a user-supplied root, so overlap checks compare like with like.
pub fn canonical_root(path: &str) -> String {
    fs::canonicalize(path)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_non_overlapping_no_overlap() {
        let dirs = vec![
            "/home/user/novels".to_string(),
            "/home/user/docs".to_string(),
            "/var/data".to_string(),
        ];
        assert_eq!(non_overlapping_directories(dirs).len(), 3);
    }

    #[test]
    fn test_non_overlapping_with_subdirectory() {
        let dirs = vec![
            "/home/user/docs".to_string(),
            "/home/user".to_string(),
            "/var/data".to_string(),
            "/var/data/more".to_string(),
        ];
        let result = non_overlapping_directories(dirs);
        assert_eq!(result, vec!["/home/user".to_string(), "/var/data".to_string()]);
    }

    #[test]
    fn test_scan_hashes_only_colliding_sizes() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join("skip")).unwrap();
        fs::write(root.join("a/Novel 1-10.txt"), "same words here").unwrap();
        fs::write(root.join("b/Novel 1-10.txt"), "same words here").unwrap();
        fs::write(root.join("b/Other.txt"), "diff words here").unwrap();
        fs::write(root.join("a/Unique.txt"), "a longer unique body").unwrap();
        fs::write(root.join("a/empty.txt"), "").unwrap();
        fs::write(root.join("skip/Novel 1-10.txt"), "same words here").unwrap();

        let roots = vec![root.to_string_lossy().into_owned()];
        let ignore = vec!["*/skip".to_string()];
        let records = scan(&roots, &ignore, true).unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(
            records.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        let by_name = |suffix: &str| records.iter().find(|r| r.path.ends_with(suffix)).unwrap();
        let a = by_name("a/Novel 1-10.txt");
        let b = by_name("b/Novel 1-10.txt");
        assert!(a.strong_hash.is_some());
        assert_eq!(a.strong_hash, b.strong_hash);
        assert_eq!(a.fast_fingerprint, b.fast_fingerprint);
        // Same size, different first bytes: fingerprinted but never fully hashed.
        let other = by_name("Other.txt");
        assert!(other.fast_fingerprint.is_some());
        assert!(other.strong_hash.is_none());
        assert!(by_name("Unique.txt").fast_fingerprint.is_none());
    }

    #[test]
    fn test_scan_without_hashing() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("x.txt"), "abc").unwrap();
        fs::write(tmp.path().join("y.txt"), "abc").unwrap();
        let roots = vec![tmp.path().to_string_lossy().into_owned()];
        let records = scan(&roots, &[], false).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.strong_hash.is_none()));
    }

    #[test]
    fn test_scan_rejects_missing_root() {
        assert!(scan(&["/definitely/not/here".to_string()], &[], true).is_err());
        assert!(scan(&[], &[], true).is_err());
    }
}
