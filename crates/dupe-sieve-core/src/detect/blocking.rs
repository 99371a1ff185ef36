use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Entry;
use crate::config::DetectorConfig;
use crate::model::FileId;
use crate::parser::is_degenerate;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockKey {
    /// Normalized title plus extension; `bucket` is set once an oversized
    /// block has been cut into size buckets.
    Title {
        title: String,
        extension: String,
        bucket: Option<usize>,
    },
    /// Files whose title cannot anchor a block.
    CatchAll,
    /// Renamed copies sharing a strong hash.
    Content { hash: String, chunk: usize },
}

/// A comparison unit. Holds file ids only, sorted ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub key: BlockKey,
    pub file_ids: Vec<FileId>,
}

impl Block {
    pub fn len(&self) -> usize {
        self.file_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file_ids.is_empty()
    }

    pub fn is_content(&self) -> bool {
        matches!(self.key, BlockKey::Content { .. })
    }

    /// Every unordered pair, lower id first.
    pub fn pairs(&self) -> impl Iterator<Item = (FileId, FileId)> + '_ {
        self.file_ids.iter().enumerate().flat_map(move |(i, &a)| {
            self.file_ids[i + 1..].iter().map(move |&b| (a, b))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingStats {
    pub blocks: usize,
    /// Title blocks that exceeded `max_block_size` and were cut into buckets.
    pub split_blocks: usize,
    pub catch_all_size: usize,
    /// Degenerate-title files left out of the capped catch-all block.
    pub catch_all_overflow: usize,
    pub content_blocks: usize,
    pub comparisons: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BlockingOutcome {
    pub blocks: Vec<Block>,
    pub stats: BlockingStats,
    /// Index into `blocks` of the title or catch-all block holding each file.
    home: AHashMap<FileId, usize>,
}

impl BlockingOutcome {
    /// Pairs of `block` the detector still has to look at. Content blocks skip
    /// pairs that already share a title block.
    pub fn comparison_pairs(&self, block: &Block) -> Vec<(FileId, FileId)> {
        if !block.is_content() {
            return block.pairs().collect();
        }
        block
            .pairs()
            .filter(|(a, b)| match (self.home.get(a), self.home.get(b)) {
                (Some(x), Some(y)) => x != y,
                _ => true,
            })
            .collect()
    }
}

/// Recall-first partitioning of the file set into comparison-bounded blocks.
#[derive(Debug, Clone)]
pub struct BlockingService {
    max_block_size: usize,
    catch_all_cap: usize,
}

impl BlockingService {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            max_block_size: config.max_block_size.max(2),
            catch_all_cap: config.catch_all_cap,
        }
    }

    pub fn block(&self, entries: &[Entry<'_>]) -> BlockingOutcome {
        let mut stats = BlockingStats::default();
        let sizes: AHashMap<FileId, i64> =
            entries.iter().map(|e| (e.id(), e.record.size)).collect();

        let mut by_title: AHashMap<(&str, &str), Vec<FileId>> = AHashMap::new();
        let mut catch_all: Vec<FileId> = Vec::new();
        for entry in entries {
            let title = entry.parse.title.as_str();
            if title.is_empty() || is_degenerate(title) {
                catch_all.push(entry.id());
            } else {
                by_title
                    .entry((title, entry.record.extension.as_str()))
                    .or_default()
                    .push(entry.id());
            }
        }

        let mut keyed: Vec<_> = by_title.into_iter().filter(|(_, ids)| ids.len() > 1).collect();
        keyed.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let mut blocks = Vec::new();
        for ((title, extension), mut ids) in keyed {
            if ids.len() <= self.max_block_size {
                ids.sort_unstable();
                blocks.push(Block {
                    key: BlockKey::Title {
                        title: title.to_string(),
                        extension: extension.to_string(),
                        bucket: None,
                    },
                    file_ids: ids,
                });
                continue;
            }

            stats.split_blocks += 1;
            ids.sort_unstable_by_key(|id| (sizes.get(id).copied().unwrap_or(0), *id));
            let buckets: Vec<Vec<FileId>> = ids
                .chunks(self.max_block_size)
                .map(|chunk| chunk.to_vec())
                .collect();
            warn!(
                "Block '{}' (.{}) has {} files, split into {} size buckets",
                title,
                extension,
                ids.len(),
                buckets.len()
            );
            for (bucket, mut chunk) in buckets.into_iter().enumerate() {
                if chunk.len() < 2 {
                    continue;
                }
                chunk.sort_unstable();
                blocks.push(Block {
                    key: BlockKey::Title {
                        title: title.to_string(),
                        extension: extension.to_string(),
                        bucket: Some(bucket),
                    },
                    file_ids: chunk,
                });
            }
        }

        catch_all.sort_unstable();
        if catch_all.len() > self.catch_all_cap {
            stats.catch_all_overflow = catch_all.len() - self.catch_all_cap;
            warn!(
                "Catch-all block holds {} untitled files; comparing {}, {} left out",
                catch_all.len(),
                self.catch_all_cap,
                stats.catch_all_overflow
            );
            catch_all.truncate(self.catch_all_cap);
        }
        stats.catch_all_size = catch_all.len();
        if catch_all.len() > 1 {
            blocks.push(Block {
                key: BlockKey::CatchAll,
                file_ids: catch_all,
            });
        }

        let mut home = AHashMap::new();
        for (idx, block) in blocks.iter().enumerate() {
            for &id in &block.file_ids {
                home.insert(id, idx);
            }
        }

        let content = self.content_blocks(entries, &home);
        stats.content_blocks = content.len();
        blocks.extend(content);

        stats.blocks = blocks.len();
        let mut outcome = BlockingOutcome {
            blocks,
            stats,
            home,
        };
        outcome.stats.comparisons = outcome
            .blocks
            .iter()
            .map(|block| outcome.comparison_pairs(block).len())
            .sum();
        debug!(
            "Blocking produced {} blocks ({} content, {} split) with {} comparisons",
            outcome.stats.blocks,
            outcome.stats.content_blocks,
            outcome.stats.split_blocks,
            outcome.stats.comparisons
        );
        outcome
    }

    /// Strong-hash groups whose members are not already all in one block.
    fn content_blocks(&self, entries: &[Entry<'_>], home: &AHashMap<FileId, usize>) -> Vec<Block> {
        let mut by_hash: AHashMap<&str, Vec<FileId>> = AHashMap::new();
        for entry in entries {
            if let Some(hash) = entry.record.strong_hash.as_deref() {
                by_hash.entry(hash).or_default().push(entry.id());
            }
        }

        let mut groups: Vec<_> = by_hash
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .filter(|(_, ids)| {
                let first = home.get(&ids[0]);
                first.is_none() || ids.iter().any(|id| home.get(id) != first)
            })
            .collect();
        groups.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let mut blocks = Vec::new();
        for (hash, mut ids) in groups {
            ids.sort_unstable();
            for (chunk, part) in ids.chunks(self.max_block_size).enumerate() {
                if part.len() < 2 {
                    continue;
                }
                blocks.push(Block {
                    key: BlockKey::Content {
                        hash: hash.to_string(),
                        chunk,
                    },
                    file_ids: part.to_vec(),
                });
            }
        }
        blocks
    }
}
