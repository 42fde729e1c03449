//! Filesystem persistence for the segmented image and link contents.
//!
//! Two files live under the repository path: `segments.bin`, the whole
//! segmented element image, and `strings.bin`, the link-content index. Both
//! carry a magic tag and a format version and are framed with big-endian
//! words. Durability is periodic whole-image save; there is no journal.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::info;

use crate::element::{Element, ELEMENT_ENCODED_LEN};
use crate::error::{MemoryError, Result};
use crate::store::{SegmentAlloc, Store};

const SEGMENTS_FILE: &str = "segments.bin";
const STRINGS_FILE: &str = "strings.bin";
const SEGMENTS_MAGIC: &[u8; 4] = b"NMSG";
const STRINGS_MAGIC: &[u8; 4] = b"NMST";
const FORMAT_VERSION: u32 = 1;

struct LinkEntry {
    bytes: Vec<u8>,
    searchable: bool,
}

pub struct FileStore {
    repo_path: PathBuf,
    links: Mutex<HashMap<u32, LinkEntry>>,
}

impl FileStore {
    /// Opens the repository directory, loading the link index unless `clear`.
    pub fn open(repo_path: &Path, clear: bool) -> Result<Self> {
        fs::create_dir_all(repo_path)?;
        let store = Self {
            repo_path: repo_path.to_path_buf(),
            links: Mutex::new(HashMap::new()),
        };
        if !clear {
            store.load_links()?;
        }
        Ok(store)
    }

    // ------------------------------------------------------------------
    // Link content index
    // ------------------------------------------------------------------

    pub fn link_string_set(&self, addr_key: u32, bytes: &[u8], searchable: bool) -> Result<()> {
        self.links.lock().insert(
            addr_key,
            LinkEntry {
                bytes: bytes.to_vec(),
                searchable,
            },
        );
        Ok(())
    }

    pub fn link_string_get(&self, addr_key: u32) -> Option<Vec<u8>> {
        self.links.lock().get(&addr_key).map(|e| e.bytes.clone())
    }

    pub fn link_string_unlink(&self, addr_key: u32) -> Result<()> {
        self.links.lock().remove(&addr_key);
        Ok(())
    }

    pub fn find_by_exact(&self, needle: &[u8]) -> Vec<u32> {
        let links = self.links.lock();
        let mut keys: Vec<u32> = links
            .iter()
            .filter(|(_, e)| e.searchable && e.bytes == needle)
            .map(|(&k, _)| k)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Substring search. A needle no longer than `prefix_limit` matches by
    /// prefix, a longer one by containment.
    pub fn find_by_substring(&self, needle: &[u8], prefix_limit: u32) -> Vec<u32> {
        let links = self.links.lock();
        let mut keys: Vec<u32> = links
            .iter()
            .filter(|(_, e)| e.searchable && Self::substring_matches(&e.bytes, needle, prefix_limit))
            .map(|(&k, _)| k)
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn find_strings_by_substring(&self, needle: &[u8], prefix_limit: u32) -> Vec<Vec<u8>> {
        let links = self.links.lock();
        let mut found: Vec<Vec<u8>> = links
            .values()
            .filter(|e| e.searchable && Self::substring_matches(&e.bytes, needle, prefix_limit))
            .map(|e| e.bytes.clone())
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }

    fn substring_matches(haystack: &[u8], needle: &[u8], prefix_limit: u32) -> bool {
        if needle.len() as u32 <= prefix_limit {
            haystack.starts_with(needle)
        } else {
            haystack
                .windows(needle.len().max(1))
                .any(|window| window == needle)
        }
    }

    // ------------------------------------------------------------------
    // Whole-image save / load
    // ------------------------------------------------------------------

    pub fn save(&self, store: &Store) -> Result<()> {
        self.save_segments(store)?;
        self.save_links()?;
        Ok(())
    }

    pub fn load(&self, store: &Store) -> Result<()> {
        self.load_segments(store)
    }

    fn save_segments(&self, store: &Store) -> Result<()> {
        let path = self.repo_path.join(SEGMENTS_FILE);
        let mut out = BufWriter::new(File::create(&path)?);
        let (count, not_engaged, released) = store.lists_state();

        out.write_all(SEGMENTS_MAGIC)?;
        out.write_all(&FORMAT_VERSION.to_be_bytes())?;
        out.write_all(&count.to_be_bytes())?;
        out.write_all(&not_engaged.to_be_bytes())?;
        out.write_all(&released.to_be_bytes())?;

        let mut buf = Vec::with_capacity(ELEMENT_ENCODED_LEN);
        let mut elements: u64 = 0;
        for num in 1..=count {
            let segment = store
                .segment(num)
                .ok_or(MemoryError::Corruption("segment vector has a hole"))?;
            let alloc = segment.alloc_state();
            out.write_all(&num.to_be_bytes())?;
            out.write_all(&alloc.last_engaged_offset.to_be_bytes())?;
            out.write_all(&alloc.last_released_offset.to_be_bytes())?;
            for offset in 0..=alloc.last_engaged_offset {
                let cell = segment.cell(offset);
                buf.clear();
                // Quiescent save: slot contents are not re-locked here.
                unsafe { cell.get() }.encode(cell.access_raw(), &mut buf);
                out.write_all(&buf)?;
                elements += 1;
            }
        }
        out.flush()?;
        info!(segments = count, slots = elements, path = %path.display(), "image saved");
        Ok(())
    }

    fn load_segments(&self, store: &Store) -> Result<()> {
        let path = self.repo_path.join(SEGMENTS_FILE);
        if !path.exists() {
            info!(path = %path.display(), "no persisted image, starting empty");
            return Ok(());
        }
        let mut input = BufReader::new(File::open(&path)?);

        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if &magic != SEGMENTS_MAGIC {
            return Err(MemoryError::Corruption("bad segments magic"));
        }
        if read_u32(&mut input)? != FORMAT_VERSION {
            return Err(MemoryError::Corruption("unsupported segments version"));
        }
        let count = read_u16(&mut input)?;
        if count > store.max_segments() {
            return Err(MemoryError::Corruption("image exceeds the segment limit"));
        }
        let not_engaged = read_u16(&mut input)?;
        let released = read_u16(&mut input)?;

        let mut record = [0u8; ELEMENT_ENCODED_LEN];
        for _ in 0..count {
            let num = read_u16(&mut input)?;
            let segment = store.install_segment(num)?;
            let last_engaged_offset = read_u16(&mut input)?;
            let last_released_offset = read_u16(&mut input)?;
            segment.set_alloc_state(SegmentAlloc {
                last_engaged_offset,
                last_released_offset,
            });
            for offset in 0..=last_engaged_offset {
                input
                    .read_exact(&mut record)
                    .map_err(|_| MemoryError::Corruption("segment image truncated"))?;
                let (access, element) = Element::decode(&record)?;
                let cell = segment.cell(offset);
                unsafe { *cell.get_mut() = element };
                cell.set_access_raw(access);
            }
        }
        store.set_lists_state(count, not_engaged, released);
        info!(segments = count, path = %path.display(), "image loaded");
        Ok(())
    }

    fn save_links(&self) -> Result<()> {
        let path = self.repo_path.join(STRINGS_FILE);
        let mut out = BufWriter::new(File::create(&path)?);
        let links = self.links.lock();

        out.write_all(STRINGS_MAGIC)?;
        out.write_all(&FORMAT_VERSION.to_be_bytes())?;
        out.write_all(&(links.len() as u32).to_be_bytes())?;
        for (&key, entry) in links.iter() {
            out.write_all(&key.to_be_bytes())?;
            out.write_all(&[entry.searchable as u8])?;
            out.write_all(&(entry.bytes.len() as u32).to_be_bytes())?;
            out.write_all(&entry.bytes)?;
        }
        out.flush()?;
        Ok(())
    }

    fn load_links(&self) -> Result<()> {
        let path = self.repo_path.join(STRINGS_FILE);
        if !path.exists() {
            return Ok(());
        }
        let mut input = BufReader::new(File::open(&path)?);

        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if &magic != STRINGS_MAGIC {
            return Err(MemoryError::Corruption("bad strings magic"));
        }
        if read_u32(&mut input)? != FORMAT_VERSION {
            return Err(MemoryError::Corruption("unsupported strings version"));
        }
        let count = read_u32(&mut input)?;

        let mut links = self.links.lock();
        for _ in 0..count {
            let key = read_u32(&mut input)?;
            let mut flag = [0u8; 1];
            input.read_exact(&mut flag)?;
            let len = read_u32(&mut input)? as usize;
            let mut bytes = vec![0u8; len];
            input
                .read_exact(&mut bytes)
                .map_err(|_| MemoryError::Corruption("strings image truncated"))?;
            links.insert(
                key,
                LinkEntry {
                    bytes,
                    searchable: flag[0] != 0,
                },
            );
        }
        Ok(())
    }
}

fn read_u16(input: &mut impl Read) -> Result<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32(input: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}
