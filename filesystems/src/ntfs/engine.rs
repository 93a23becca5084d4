use std::collections::{HashMap, HashSet, VecDeque};

use rdimg_core::{DiskError, DiskResult};

use crate::VolumeReader;

use super::attribute_list::parse_attribute_list;
use super::attributes::{Attribute, AttributeBody, FileNameAttribute};
use super::boot_sector::NtfsBootSector;
use super::data_runs::read_run_list_bytes;
use super::file::FileHandle;
use super::filerecord::FileRecord;
use super::index::{IndexEntry, IndexRecord, IndexRoot};
use super::mft::MftReader;
use super::structures::{
    FileNameNamespace, ATTR_TYPE_ATTRIBUTE_LIST, ATTR_TYPE_DATA, ATTR_TYPE_INDEX_ALLOCATION,
    ATTR_TYPE_INDEX_ROOT, MFT_RECORD_ROOT, RESERVED_RECORD_THRESHOLD,
};

/// One resolved child of a directory listing: the "main" name, chosen by
/// namespace priority among every `FILE_NAME` pointing at the same record.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub record_number: u64,
    pub is_directory: bool,
}

/// Ties the MFT, attribute resolution, and `$I30` directory indexes
/// together into the file-level operations: `resolve`, `open`, `walk`.
pub struct NtfsEngine {
    volume: VolumeReader,
    boot: NtfsBootSector,
    mft: MftReader,
}

impl NtfsEngine {
    pub async fn open(mut volume: VolumeReader) -> DiskResult<Self> {
        let boot_bytes = volume.read_bytes(0, 512).await?;
        let boot = NtfsBootSector::parse(&boot_bytes)?;
        let mft = MftReader::open(&mut volume, &boot).await?;
        Ok(NtfsEngine { volume, boot, mft })
    }

    pub async fn get_record(&mut self, record_number: u64) -> DiskResult<FileRecord> {
        self.mft.get_record(&mut self.volume, record_number).await
    }

    /// Every attribute actually belonging to `base_record_number`: its own
    /// attributes, plus, for each `$ATTRIBUTE_LIST` entry, the attributes of
    /// the extension record it points at. Extension records are followed
    /// with a visited-record guard, since a damaged image can make two
    /// records reference each other.
    pub async fn all_attributes(&mut self, base_record_number: u64) -> DiskResult<Vec<Attribute>> {
        let base = self.get_record(base_record_number).await?;
        let Some(list_attr) = base
            .attributes_by_type(ATTR_TYPE_ATTRIBUTE_LIST)
            .next()
            .cloned()
        else {
            return Ok(base.attributes.clone());
        };

        let list_bytes = self.read_attribute_bytes(&list_attr).await?;
        let entries = parse_attribute_list(&list_bytes)?;

        let mut seen = HashSet::new();
        seen.insert(base_record_number);
        let mut attributes = Vec::new();

        for entry in entries {
            let target = entry.target_record_number();
            if !seen.insert(target) {
                continue;
            }
            let record = self.get_record(target).await?;
            attributes.extend(record.attributes.iter().cloned());
        }

        for attr in &base.attributes {
            if attr.header.attr_type != ATTR_TYPE_ATTRIBUTE_LIST {
                attributes.push(attr.clone());
            }
        }

        Ok(attributes)
    }

    async fn read_attribute_bytes(&mut self, attr: &Attribute) -> DiskResult<Vec<u8>> {
        match &attr.body {
            AttributeBody::Resident { data } => Ok(data.clone()),
            AttributeBody::NonResident { runs, real_size, .. } => {
                read_run_list_bytes(&mut self.volume, runs, 0, *real_size).await
            }
        }
    }

    fn namespace_priority(ns: FileNameNamespace) -> u8 {
        match ns {
            FileNameNamespace::Win32AndDos => 3,
            FileNameNamespace::Win32 => 2,
            FileNameNamespace::Posix => 1,
            FileNameNamespace::Dos => 0,
        }
    }

    /// Folds a node's leaf entries into `out`, keeping the highest-priority
    /// namespace name seen so far for each target record. Reserved metadata
    /// records are left out of listings even though they're legitimately
    /// indexed under the volume root.
    fn fold_entries_into(entries: &[IndexEntry], out: &mut HashMap<u64, (String, u8)>) {
        for entry in entries {
            if entry.file_reference < RESERVED_RECORD_THRESHOLD {
                continue;
            }
            let Some(stream) = &entry.stream else { continue };
            let Ok(fna) = FileNameAttribute::parse(stream) else {
                continue;
            };
            let priority = Self::namespace_priority(fna.namespace);
            out.entry(entry.file_reference)
                .and_modify(|(name, best)| {
                    if priority > *best {
                        *name = fna.name.clone();
                        *best = priority;
                    }
                })
                .or_insert((fna.name.clone(), priority));
        }
    }

    /// Lists the immediate children of a directory record, merging the
    /// inline `INDEX_ROOT` entries with every `INDEX_ALLOCATION` sub-node
    /// reachable from them.
    pub async fn list_directory(&mut self, record_number: u64) -> DiskResult<Vec<DirectoryEntry>> {
        let record = self.get_record(record_number).await?;
        if !record.is_directory() {
            return Err(DiskError::NotADirectory(format!(
                "record {} is not a directory",
                record_number
            )));
        }

        let index_root_data = record
            .attributes_by_type(ATTR_TYPE_INDEX_ROOT)
            .next()
            .and_then(|a| a.resident_data())
            .ok_or_else(|| DiskError::corrupt("directory record has no resident INDEX_ROOT"))?;
        let index_root = IndexRoot::parse(index_root_data)?;

        let mut best: HashMap<u64, (String, u8)> = HashMap::new();
        Self::fold_entries_into(&index_root.entries, &mut best);

        let mut worklist: Vec<u64> = index_root
            .entries
            .iter()
            .filter_map(|e| e.sub_node_vcn)
            .collect();

        if !worklist.is_empty() {
            let alloc_attr = record
                .attributes_by_type(ATTR_TYPE_INDEX_ALLOCATION)
                .next()
                .cloned()
                .ok_or_else(|| {
                    DiskError::corrupt("directory index has sub-nodes but no INDEX_ALLOCATION")
                })?;
            let AttributeBody::NonResident { runs, real_size, .. } = &alloc_attr.body else {
                return Err(DiskError::corrupt("INDEX_ALLOCATION is unexpectedly resident"));
            };
            let record_size = self.boot.index_buffer_size() as u64;
            let mut visited = HashSet::new();

            while let Some(vcn) = worklist.pop() {
                if !visited.insert(vcn) {
                    continue;
                }
                let byte_offset = vcn * record_size;
                if byte_offset + record_size > *real_size {
                    continue;
                }
                let raw =
                    read_run_list_bytes(&mut self.volume, runs, byte_offset, record_size).await?;
                let node = IndexRecord::parse(&raw, self.boot.bytes_per_sector as u32)?;
                Self::fold_entries_into(&node.entries, &mut best);
                worklist.extend(node.entries.iter().filter_map(|e| e.sub_node_vcn));
            }
        }

        let mut result = Vec::with_capacity(best.len());
        for (target, (name, _)) in best {
            let child = self.get_record(target).await?;
            result.push(DirectoryEntry {
                name,
                record_number: target,
                is_directory: child.is_directory(),
            });
        }
        Ok(result)
    }

    /// Resolves an absolute, backslash-separated path to a record number,
    /// starting from the volume root (record 5). Matching is exact and
    /// case-sensitive, same as the on-disk index collation.
    pub async fn resolve(&mut self, path: &str) -> DiskResult<u64> {
        let mut current = MFT_RECORD_ROOT;
        for component in path.split('\\').filter(|c| !c.is_empty()) {
            let children = self.list_directory(current).await?;
            let found = children.into_iter().find(|c| c.name == component);
            match found {
                Some(entry) => current = entry.record_number,
                None => {
                    return Err(DiskError::NotFound(format!(
                        "path component '{}' not found",
                        component
                    )))
                }
            }
        }
        Ok(current)
    }

    /// Opens a named data stream of the file at `path`. `stream == ""`
    /// binds to the unnamed default `DATA` attribute.
    pub async fn open(&mut self, path: &str, stream: &str) -> DiskResult<FileHandle> {
        let record_number = self.resolve(path).await?;
        let record = self.get_record(record_number).await?;
        if record.is_directory() {
            return Err(DiskError::NotAFile(format!("{} is a directory", path)));
        }

        let attributes = self.all_attributes(record_number).await?;
        let data_attr = attributes
            .into_iter()
            .find(|a| {
                a.header.attr_type == ATTR_TYPE_DATA
                    && a.header.name.as_deref().unwrap_or("") == stream
            })
            .ok_or_else(|| DiskError::NotFound(format!("no data stream '{}' on {}", stream, path)))?;

        FileHandle::new(&record, &data_attr)
    }

    /// Breadth-first directory walk, yielding `(directory_path, sub_dirs,
    /// files)`. Already-visited records are skipped so a corrupt or cyclic
    /// index can't loop forever.
    pub async fn walk(
        &mut self,
        path: &str,
    ) -> DiskResult<Vec<(String, Vec<String>, Vec<String>)>> {
        let root_record = self.resolve(path).await?;
        let mut results = Vec::new();
        let mut visited = HashSet::new();
        let mut worklist = VecDeque::new();
        worklist.push_back((path.trim_end_matches('\\').to_string(), root_record));

        while let Some((dir_path, record_number)) = worklist.pop_front() {
            if !visited.insert(record_number) {
                continue;
            }
            let children = self.list_directory(record_number).await?;
            let mut sub_dirs = Vec::new();
            let mut files = Vec::new();

            for child in children {
                if child.is_directory {
                    sub_dirs.push(child.name.clone());
                    let child_path = format!("{}\\{}", dir_path, child.name);
                    worklist.push_back((child_path, child.record_number));
                } else {
                    files.push(child.name);
                }
            }

            results.push((dir_path, sub_dirs, files));
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_priority_prefers_win32_over_dos() {
        assert!(
            NtfsEngine::namespace_priority(FileNameNamespace::Win32)
                > NtfsEngine::namespace_priority(FileNameNamespace::Dos)
        );
        assert!(
            NtfsEngine::namespace_priority(FileNameNamespace::Win32AndDos)
                >= NtfsEngine::namespace_priority(FileNameNamespace::Win32)
        );
    }

    #[test]
    fn fold_entries_into_keeps_highest_priority_name() {
        let mut out = HashMap::new();
        let win32 = super::super::index::IndexEntry {
            file_reference: 100,
            flags: Default::default(),
            stream: Some(build_file_name("Readme.Txt", FileNameNamespace::Win32)),
            sub_node_vcn: None,
        };
        let dos = super::super::index::IndexEntry {
            file_reference: 100,
            flags: Default::default(),
            stream: Some(build_file_name("README~1.TXT", FileNameNamespace::Dos)),
            sub_node_vcn: None,
        };
        NtfsEngine::fold_entries_into(&[dos, win32], &mut out);
        assert_eq!(out.get(&100).unwrap().0, "Readme.Txt");
    }

    #[test]
    fn fold_entries_into_skips_reserved_records() {
        let mut out = HashMap::new();
        let entry = super::super::index::IndexEntry {
            file_reference: 0,
            flags: Default::default(),
            stream: Some(build_file_name("$MFT", FileNameNamespace::Win32)),
            sub_node_vcn: None,
        };
        NtfsEngine::fold_entries_into(&[entry], &mut out);
        assert!(out.is_empty());
    }

    fn build_file_name(name: &str, namespace: FileNameNamespace) -> Vec<u8> {
        let name_units: Vec<u16> = name.encode_utf16().collect();
        let mut buf = vec![0u8; 66 + name_units.len() * 2];
        buf[64] = name_units.len() as u8;
        buf[65] = match namespace {
            FileNameNamespace::Posix => 0,
            FileNameNamespace::Win32 => 1,
            FileNameNamespace::Dos => 2,
            FileNameNamespace::Win32AndDos => 3,
        };
        for (i, u) in name_units.iter().enumerate() {
            buf[66 + i * 2..66 + i * 2 + 2].copy_from_slice(&u.to_le_bytes());
        }
        buf
    }
}
