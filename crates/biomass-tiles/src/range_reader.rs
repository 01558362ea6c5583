//! `Read + Seek` over ranged blob requests.
//!
//! The GeoTIFF decoder seeks to the IFD and then to individual strips or
//! tiles. Serving those reads from fixed-size blocks means a window read
//! touches only the header and the chunks under the window. Blocks are
//! shared between readers through [`BlockCache`].

use crate::blob::BlobStore;
use biomass_metrics::metric_defs;
use lru::LruCache;
use parking_lot::Mutex;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default block size for ranged reads.
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024;

type BlockKey = (Arc<str>, u64);

/// LRU of fetched blob blocks, shared by all range readers.
pub struct BlockCache {
    blocks: Mutex<LruCache<BlockKey, Arc<Vec<u8>>>>,
    block_size: u64,
    bytes_fetched: AtomicU64,
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("block_size", &self.block_size)
            .field("blocks", &self.blocks.lock().len())
            .finish()
    }
}

impl BlockCache {
    /// Create a cache of at most `capacity` blocks of `block_size` bytes.
    pub fn new(block_size: u64, capacity: usize) -> Self {
        Self {
            blocks: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            block_size: block_size.max(1),
            bytes_fetched: AtomicU64::new(0),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Bytes fetched from storage through this cache.
    pub fn bytes_fetched(&self) -> u64 {
        self.bytes_fetched.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.blocks.lock().clear();
    }

    fn get(&self, key: &BlockKey) -> Option<Arc<Vec<u8>>> {
        self.blocks.lock().get(key).cloned()
    }

    fn insert(&self, key: BlockKey, block: Arc<Vec<u8>>) {
        self.bytes_fetched
            .fetch_add(block.len() as u64, Ordering::Relaxed);
        metrics::counter!(metric_defs::TILE_BYTES_DOWNLOADED.name).increment(block.len() as u64);
        self.blocks.lock().put(key, block);
    }
}

/// A seekable reader over one blob, fetching block-aligned ranges on demand.
pub struct BlobRangeReader<'a> {
    store: &'a dyn BlobStore,
    blocks: &'a BlockCache,
    container: &'a str,
    name: &'a str,
    key: Arc<str>,
    size: u64,
    pos: u64,
}

impl<'a> BlobRangeReader<'a> {
    /// Open a reader; this issues one size request.
    pub fn open(
        store: &'a dyn BlobStore,
        blocks: &'a BlockCache,
        container: &'a str,
        name: &'a str,
    ) -> crate::Result<Self> {
        let size = store.size(container, name)?;
        Ok(Self {
            store,
            blocks,
            container,
            name,
            key: Arc::from(format!("{}/{}", container, name)),
            size,
            pos: 0,
        })
    }

    /// Blob size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn block(&self, index: u64) -> io::Result<Arc<Vec<u8>>> {
        let key = (Arc::clone(&self.key), index);
        if let Some(block) = self.blocks.get(&key) {
            return Ok(block);
        }
        let start = index * self.blocks.block_size;
        let len = self.blocks.block_size.min(self.size - start);
        let bytes = self
            .store
            .get_range(self.container, self.name, start, len)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let block = Arc::new(bytes);
        self.blocks.insert(key, Arc::clone(&block));
        Ok(block)
    }
}

impl Read for BlobRangeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.size {
            return Ok(0);
        }
        let block_size = self.blocks.block_size;
        let index = self.pos / block_size;
        let block = self.block(index)?;
        let within = (self.pos - index * block_size) as usize;
        if within >= block.len() {
            return Ok(0);
        }
        let n = buf.len().min(block.len() - within);
        buf[..n].copy_from_slice(&block[within..within + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for BlobRangeReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of blob",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    fn store() -> MemoryBlobStore {
        let store = MemoryBlobStore::new();
        store.put("c", "b", (0..=255u8).cycle().take(1000).collect());
        store
    }

    #[test]
    fn test_reads_across_blocks() {
        let store = store();
        let blocks = BlockCache::new(64, 100);
        let mut reader = BlobRangeReader::open(&store, &blocks, "c", "b").unwrap();

        reader.seek(SeekFrom::Start(60)).unwrap();
        let mut buf = [0u8; 10];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [60, 61, 62, 63, 64, 65, 66, 67, 68, 69]);

        let mut all = Vec::new();
        reader.seek(SeekFrom::Start(0)).unwrap();
        reader.read_to_end(&mut all).unwrap();
        assert_eq!(all.len(), 1000);
        assert_eq!(all[999], (999 % 256) as u8);
    }

    #[test]
    fn test_blocks_are_shared() {
        let store = store();
        let blocks = BlockCache::new(100, 100);
        {
            let mut r = BlobRangeReader::open(&store, &blocks, "c", "b").unwrap();
            let mut buf = [0u8; 50];
            r.read_exact(&mut buf).unwrap();
        }
        let before = store.stats().range_gets;
        let mut r = BlobRangeReader::open(&store, &blocks, "c", "b").unwrap();
        let mut buf = [0u8; 50];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(store.stats().range_gets, before);
        assert_eq!(blocks.bytes_fetched(), 100);
    }

    #[test]
    fn test_seek_bounds() {
        let store = store();
        let blocks = BlockCache::new(64, 4);
        let mut r = BlobRangeReader::open(&store, &blocks, "c", "b").unwrap();
        assert_eq!(r.seek(SeekFrom::End(-10)).unwrap(), 990);
        assert!(r.seek(SeekFrom::Current(-2000)).is_err());
        r.seek(SeekFrom::Start(5000)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf).unwrap(), 0);
    }
}
