// SPDX-License-Identifier: LGPL-3.0-or-later
/*
 * lxcore: Linux personality core (signals + VFS) for user-space emulators
 * Copyright (C) 2019-2025 Aleksa Sarai <cyphar@cyphar.com>
 * Copyright (C) 2019-2025 SUSE LLC
 *
 * This program is free software: you can redistribute it and/or modify it
 * under the terms of the GNU Lesser General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or (at your
 * option) any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
 * or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License
 * for more details.
 *
 * You should have received a copy of the GNU Lesser General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! An in-memory filesystem for the test harness: real directories, files,
//! hard links, and symlinks, plus a probe counter so resolver traces can be
//! asserted exactly.

use crate::{
    error::{Error, ErrorImpl},
    vfs::{
        dirent::DirentSink,
        file::{File, FileSystem, FileType, FlagsCell, OpenFlags, OpenOutcome},
        poll::PollEvents,
        stat::{FileStat, FsStat, Timespec},
    },
};

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

const TMPFS_MAGIC: i64 = 0x01021994;

#[derive(Clone)]
enum Node {
    File {
        ino: u64,
        mode: u32,
        data: Arc<Mutex<Vec<u8>>>,
        nlink: Arc<AtomicU64>,
    },
    Dir {
        ino: u64,
        mode: u32,
    },
    Symlink {
        ino: u64,
        target: Vec<u8>,
    },
}

struct Inner {
    nodes: Mutex<HashMap<Vec<u8>, Node>>,
    next_ino: AtomicU64,
    readlink_calls: AtomicUsize,
}

pub struct MemFs {
    inner: Arc<Inner>,
}

fn errno(operation: &'static str, errno: i32) -> Error {
    ErrorImpl::Errno {
        operation: operation.into(),
        errno,
    }
    .into()
}

fn noentry(path: &[u8]) -> Error {
    ErrorImpl::NoEntry {
        path: String::from_utf8_lossy(path).into_owned().into(),
    }
    .into()
}

/// Split the trailing-dot convention: `""`/`"."`/`"x/."` address a
/// directory, everything else addresses the literal key.
fn dir_key(path: &[u8]) -> (Vec<u8>, bool) {
    if path.is_empty() || path == b"." {
        (Vec::new(), true)
    } else if let Some(stripped) = path.strip_suffix(b"/.") {
        (stripped.to_vec(), true)
    } else {
        (path.to_vec(), false)
    }
}

fn parent_key(key: &[u8]) -> Vec<u8> {
    match memchr::memrchr(b'/', key) {
        Some(cut) => key[..cut].to_vec(),
        None => Vec::new(),
    }
}

impl MemFs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                nodes: Mutex::new(HashMap::new()),
                next_ino: AtomicU64::new(2),
                readlink_calls: AtomicUsize::new(0),
            }),
        })
    }

    fn alloc_ino(&self) -> u64 {
        self.inner.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of `readlink` capability calls made so far (resolver probes
    /// plus explicit readlinks).
    pub fn readlink_calls(&self) -> usize {
        self.inner.readlink_calls.load(Ordering::Relaxed)
    }

    pub fn add_dir(&self, path: &str) {
        let ino = self.alloc_ino();
        self.inner.nodes.lock().unwrap().insert(
            path.as_bytes().to_vec(),
            Node::Dir { ino, mode: 0o755 },
        );
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        let ino = self.alloc_ino();
        self.inner.nodes.lock().unwrap().insert(
            path.as_bytes().to_vec(),
            Node::File {
                ino,
                mode: 0o644,
                data: Arc::new(Mutex::new(content.to_vec())),
                nlink: Arc::new(AtomicU64::new(1)),
            },
        );
    }

    pub fn add_symlink(&self, path: &str, target: &str) {
        let ino = self.alloc_ino();
        self.inner.nodes.lock().unwrap().insert(
            path.as_bytes().to_vec(),
            Node::Symlink {
                ino,
                target: target.as_bytes().to_vec(),
            },
        );
    }

    fn require_parent_dir(
        nodes: &HashMap<Vec<u8>, Node>,
        key: &[u8],
    ) -> Result<(), Error> {
        let parent = parent_key(key);
        if parent.is_empty() {
            return Ok(());
        }
        match nodes.get(&parent) {
            Some(Node::Dir { .. }) => Ok(()),
            Some(_) => Err(errno("non-directory path component", libc::ENOTDIR)),
            None => Err(noentry(&parent)),
        }
    }
}

impl FileSystem for MemFs {
    fn name(&self) -> &str {
        "memfs"
    }

    fn open(&self, path: &[u8], flags: OpenFlags, mode: u32) -> Result<OpenOutcome, Error> {
        let (key, want_dir) = dir_key(path);
        let mut nodes = self.inner.nodes.lock().unwrap();

        let node = if key.is_empty() {
            // The mount root is an implicit directory.
            Some(Node::Dir { ino: 1, mode: 0o755 })
        } else {
            nodes.get(&key).cloned()
        };

        match node {
            Some(Node::Symlink { target, .. }) => {
                if want_dir {
                    // A symlink in directory position is not followed here;
                    // the resolver's probe takes over.
                    return Err(noentry(path));
                }
                Ok(OpenOutcome::Symlink(target))
            }
            Some(Node::Dir { ino, mode }) => {
                if flags.contains(OpenFlags::O_CREAT) && flags.contains(OpenFlags::O_EXCL) {
                    return Err(errno("exclusive create over directory", libc::EEXIST));
                }
                if flags.writable() {
                    return Err(errno("open directory for writing", libc::EISDIR));
                }
                Ok(OpenOutcome::Opened(Arc::new(MemDir {
                    inner: Arc::clone(&self.inner),
                    key,
                    ino,
                    mode,
                    flags: FlagsCell::new(flags),
                    pos: AtomicU64::new(0),
                })))
            }
            Some(Node::File {
                ino,
                mode,
                data,
                nlink,
            }) => {
                if want_dir || flags.contains(OpenFlags::O_DIRECTORY) {
                    return Err(errno("not a directory", libc::ENOTDIR));
                }
                if flags.contains(OpenFlags::O_CREAT) && flags.contains(OpenFlags::O_EXCL) {
                    return Err(errno("exclusive create over existing file", libc::EEXIST));
                }
                if flags.contains(OpenFlags::O_TRUNC) && flags.writable() {
                    data.lock().unwrap().clear();
                }
                Ok(OpenOutcome::Opened(Arc::new(MemFile {
                    ino,
                    mode,
                    data,
                    nlink,
                    pos: Mutex::new(0),
                    flags: FlagsCell::new(flags),
                })))
            }
            None => {
                if want_dir || !flags.contains(OpenFlags::O_CREAT) {
                    return Err(noentry(path));
                }
                Self::require_parent_dir(&nodes, &key)?;
                let ino = self.alloc_ino();
                let data = Arc::new(Mutex::new(Vec::new()));
                let nlink = Arc::new(AtomicU64::new(1));
                nodes.insert(
                    key,
                    Node::File {
                        ino,
                        mode: mode & 0o7777,
                        data: Arc::clone(&data),
                        nlink: Arc::clone(&nlink),
                    },
                );
                Ok(OpenOutcome::Opened(Arc::new(MemFile {
                    ino,
                    mode: mode & 0o7777,
                    data,
                    nlink,
                    pos: Mutex::new(0),
                    flags: FlagsCell::new(flags),
                })))
            }
        }
    }

    fn link(&self, oldpath: &[u8], newpath: &[u8]) -> Result<(), Error> {
        let mut nodes = self.inner.nodes.lock().unwrap();
        let node = match nodes.get(oldpath) {
            Some(Node::Dir { .. }) => return Err(errno("hard link to directory", libc::EPERM)),
            Some(node) => node.clone(),
            None => return Err(noentry(oldpath)),
        };
        if nodes.contains_key(newpath) {
            return Err(errno("link target exists", libc::EEXIST));
        }
        Self::require_parent_dir(&nodes, newpath)?;
        if let Node::File { nlink, .. } = &node {
            nlink.fetch_add(1, Ordering::Relaxed);
        }
        nodes.insert(newpath.to_vec(), node);
        Ok(())
    }

    fn unlink(&self, path: &[u8]) -> Result<(), Error> {
        let mut nodes = self.inner.nodes.lock().unwrap();
        match nodes.get(path) {
            Some(Node::Dir { .. }) => Err(errno("unlink directory", libc::EISDIR)),
            Some(Node::File { nlink, .. }) => {
                nlink.fetch_sub(1, Ordering::Relaxed);
                nodes.remove(path);
                Ok(())
            }
            Some(Node::Symlink { .. }) => {
                nodes.remove(path);
                Ok(())
            }
            None => Err(noentry(path)),
        }
    }

    fn symlink(&self, target: &[u8], path: &[u8]) -> Result<(), Error> {
        let mut nodes = self.inner.nodes.lock().unwrap();
        if nodes.contains_key(path) {
            return Err(errno("symlink target exists", libc::EEXIST));
        }
        Self::require_parent_dir(&nodes, path)?;
        let ino = self.alloc_ino();
        nodes.insert(
            path.to_vec(),
            Node::Symlink {
                ino,
                target: target.to_vec(),
            },
        );
        Ok(())
    }

    fn readlink(&self, path: &[u8]) -> Result<Vec<u8>, Error> {
        self.inner.readlink_calls.fetch_add(1, Ordering::Relaxed);
        let nodes = self.inner.nodes.lock().unwrap();
        match nodes.get(path) {
            Some(Node::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(errno("readlink on non-symlink", libc::EINVAL)),
            None => Err(noentry(path)),
        }
    }

    fn mkdir(&self, path: &[u8], mode: u32) -> Result<(), Error> {
        let mut nodes = self.inner.nodes.lock().unwrap();
        if nodes.contains_key(path) {
            return Err(errno("mkdir over existing entry", libc::EEXIST));
        }
        Self::require_parent_dir(&nodes, path)?;
        let ino = self.alloc_ino();
        nodes.insert(
            path.to_vec(),
            Node::Dir {
                ino,
                mode: mode & 0o7777,
            },
        );
        Ok(())
    }

    fn rmdir(&self, path: &[u8]) -> Result<(), Error> {
        let mut nodes = self.inner.nodes.lock().unwrap();
        match nodes.get(path) {
            Some(Node::Dir { .. }) => {
                let mut prefix = path.to_vec();
                prefix.push(b'/');
                if nodes.keys().any(|key| key.starts_with(&prefix)) {
                    return Err(errno("rmdir of non-empty directory", libc::ENOTEMPTY));
                }
                nodes.remove(path);
                Ok(())
            }
            Some(_) => Err(errno("rmdir on non-directory", libc::ENOTDIR)),
            None => Err(noentry(path)),
        }
    }

    fn rename(&self, oldpath: &[u8], newpath: &[u8]) -> Result<(), Error> {
        let mut nodes = self.inner.nodes.lock().unwrap();
        let node = nodes.get(oldpath).cloned().ok_or_else(|| noentry(oldpath))?;
        Self::require_parent_dir(&nodes, newpath)?;
        if let Some(Node::Dir { .. }) = nodes.get(newpath) {
            return Err(errno("rename over directory", libc::EISDIR));
        }

        // Move the entry and, for directories, the whole subtree.
        nodes.remove(oldpath);
        if let Node::Dir { .. } = node {
            let mut old_prefix = oldpath.to_vec();
            old_prefix.push(b'/');
            let moved: Vec<(Vec<u8>, Node)> = nodes
                .iter()
                .filter(|(key, _)| key.starts_with(&old_prefix))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            for (key, value) in moved {
                nodes.remove(&key);
                let mut new_key = newpath.to_vec();
                new_key.push(b'/');
                new_key.extend_from_slice(&key[old_prefix.len()..]);
                nodes.insert(new_key, value);
            }
        }
        nodes.insert(newpath.to_vec(), node);
        Ok(())
    }
}

fn mem_statfs() -> FsStat {
    FsStat {
        fs_type: TMPFS_MAGIC,
        bsize: 4096,
        blocks: 1 << 16,
        bfree: 1 << 15,
        bavail: 1 << 15,
        files: 1 << 16,
        ffree: 1 << 15,
        namelen: 255,
        frsize: 4096,
        flags: 0,
    }
}

pub struct MemFile {
    ino: u64,
    mode: u32,
    data: Arc<Mutex<Vec<u8>>>,
    nlink: Arc<AtomicU64>,
    pos: Mutex<u64>,
    flags: FlagsCell,
}

impl File for MemFile {
    fn flags(&self) -> OpenFlags {
        self.flags.get()
    }

    fn set_flags(&self, flags: OpenFlags) {
        self.flags.set(flags);
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let data = self.data.lock().unwrap();
        let mut pos = self.pos.lock().unwrap();
        let start = (*pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        *pos += n as u64;
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        let mut data = self.data.lock().unwrap();
        let mut pos = self.pos.lock().unwrap();
        if self.flags.get().contains(OpenFlags::O_APPEND) {
            *pos = data.len() as u64;
        }
        let start = *pos as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        *pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn pread(&self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        let data = self.data.lock().unwrap();
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn pwrite(&self, buf: &[u8], offset: u64) -> Result<usize, Error> {
        let mut data = self.data.lock().unwrap();
        let start = offset as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn llseek(&self, offset: i64, whence: crate::vfs::file::SeekWhence) -> Result<u64, Error> {
        use crate::vfs::file::SeekWhence;
        let len = self.data.lock().unwrap().len() as i64;
        let mut pos = self.pos.lock().unwrap();
        let base = match whence {
            SeekWhence::Set => 0,
            SeekWhence::Cur => *pos as i64,
            SeekWhence::End => len,
        };
        let target = base + offset;
        if target < 0 {
            return Err(errno("seek before start of file", libc::EINVAL));
        }
        *pos = target as u64;
        Ok(*pos)
    }

    fn stat(&self) -> Result<FileStat, Error> {
        let size = self.data.lock().unwrap().len() as i64;
        Ok(FileStat {
            dev: TMPFS_MAGIC as u64,
            ino: self.ino,
            mode: FileType::Regular.mode_bits() | self.mode,
            nlink: self.nlink.load(Ordering::Relaxed),
            size,
            blksize: 4096,
            blocks: (size + 511) / 512,
            ..FileStat::default()
        })
    }

    fn statfs(&self) -> Result<FsStat, Error> {
        Ok(mem_statfs())
    }

    fn utimens(&self, _atime: Option<Timespec>, _mtime: Option<Timespec>) -> Result<(), Error> {
        Ok(())
    }

    fn poll_status(&self) -> PollEvents {
        PollEvents::POLLIN | PollEvents::POLLOUT
    }
}

pub struct MemDir {
    inner: Arc<Inner>,
    key: Vec<u8>,
    ino: u64,
    mode: u32,
    flags: FlagsCell,
    pos: AtomicU64,
}

impl File for MemDir {
    fn flags(&self) -> OpenFlags {
        self.flags.get()
    }

    fn set_flags(&self, flags: OpenFlags) {
        self.flags.set(flags);
    }

    fn stat(&self) -> Result<FileStat, Error> {
        Ok(FileStat {
            dev: TMPFS_MAGIC as u64,
            ino: self.ino,
            mode: FileType::Directory.mode_bits() | self.mode,
            nlink: 2,
            blksize: 4096,
            ..FileStat::default()
        })
    }

    fn statfs(&self) -> Result<FsStat, Error> {
        Ok(mem_statfs())
    }

    fn getdents(&self, sink: &mut DirentSink<'_>) -> Result<(), Error> {
        let nodes = self.inner.nodes.lock().unwrap();
        let mut entries: Vec<(u64, FileType, Vec<u8>)> = vec![
            (self.ino, FileType::Directory, b".".to_vec()),
            (self.ino, FileType::Directory, b"..".to_vec()),
        ];
        let prefix = if self.key.is_empty() {
            Vec::new()
        } else {
            let mut prefix = self.key.clone();
            prefix.push(b'/');
            prefix
        };
        let mut children: Vec<(u64, FileType, Vec<u8>)> = nodes
            .iter()
            .filter_map(|(key, node)| {
                let rest = key.strip_prefix(prefix.as_slice())?;
                if rest.is_empty() || rest.contains(&b'/') {
                    return None;
                }
                let (ino, ftype) = match node {
                    Node::File { ino, .. } => (*ino, FileType::Regular),
                    Node::Dir { ino, .. } => (*ino, FileType::Directory),
                    Node::Symlink { ino, .. } => (*ino, FileType::Symlink),
                };
                Some((ino, ftype, rest.to_vec()))
            })
            .collect();
        children.sort_by(|a, b| a.2.cmp(&b.2));
        entries.extend(children);

        loop {
            let pos = self.pos.load(Ordering::Relaxed) as usize;
            match entries.get(pos) {
                None => return Ok(()),
                Some((ino, ftype, name)) => {
                    if !sink.push(*ino, (pos + 1) as u64, *ftype, name) {
                        return Ok(());
                    }
                    self.pos.store(pos as u64 + 1, Ordering::Relaxed);
                }
            }
        }
    }

    fn poll_status(&self) -> PollEvents {
        PollEvents::POLLIN
    }
}
