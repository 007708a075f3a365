//! Sandboxed filesystem service.
//!
//! Every remote path resolves inside an immutable export root. Confinement
//! is enforced in two steps: a lexical clean (drop `.`, collapse `..`
//! against the path itself, strip any leading separator) makes the request
//! relative, then canonicalization evaluates every symbolic link before the
//! final prefix check against the canonical root. A path that fails either
//! step is a traversal error; error text never contains the export root.

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;

use crate::core::MAX_READ_CHUNK;
use crate::protocol::{ErrorCode, FileInfo};

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};

/// Errors from the filesystem service.
///
/// Messages carry at most the requested (virtual) path; the export root and
/// any canonical host path stay out of them.
#[derive(Debug, Error)]
pub enum FsError {
    /// Entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operating system refused the operation.
    #[error("permission denied")]
    PermissionDenied,

    /// Entry already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Entry is a directory where a file was expected.
    #[error("is a directory: {0}")]
    IsDirectory(String),

    /// Entry is not a directory where one was expected.
    #[error("not a directory: {0}")]
    NotDirectory(String),

    /// Path resolves outside the shared directory.
    #[error("path traversal rejected")]
    Traversal,

    /// Read offset outside `[0, size]`, or an out-of-range length.
    #[error("invalid offset")]
    InvalidOffset,

    /// Mutating operation on a read-only share.
    #[error("share is read-only")]
    ReadOnly,

    /// Other I/O failure.
    #[error("i/o failure: {0}")]
    Io(String),
}

impl FsError {
    /// The wire error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            FsError::NotFound(_) => ErrorCode::NotFound,
            FsError::PermissionDenied | FsError::ReadOnly => ErrorCode::PermissionDenied,
            FsError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            FsError::IsDirectory(_) => ErrorCode::IsDirectory,
            FsError::NotDirectory(_) => ErrorCode::NotDirectory,
            FsError::Traversal => ErrorCode::InvalidPath,
            FsError::InvalidOffset | FsError::Io(_) => ErrorCode::Io,
        }
    }
}

fn map_io(virtual_path: &str, err: std::io::Error) -> FsError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => FsError::NotFound(virtual_path.to_string()),
        ErrorKind::PermissionDenied => FsError::PermissionDenied,
        ErrorKind::AlreadyExists => FsError::AlreadyExists(virtual_path.to_string()),
        _ => FsError::Io(err.to_string()),
    }
}

/// A directory exported to the remote peer, with confinement and an
/// optional read-only policy.
#[derive(Clone, Debug)]
pub struct SecureFs {
    root: PathBuf,
    read_only: bool,
}

impl SecureFs {
    /// Open an export root. The path must exist and be a directory; it is
    /// canonicalized once and never changes for the lifetime of the share.
    pub fn new(root: impl AsRef<Path>, read_only: bool) -> Result<Self, FsError> {
        let root = fs::canonicalize(root.as_ref()).map_err(|e| map_io("<root>", e))?;
        if !root.is_dir() {
            return Err(FsError::NotDirectory("<root>".to_string()));
        }
        Ok(Self { root, read_only })
    }

    /// The canonical export root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether mutating operations are rejected.
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> Result<(), FsError> {
        if self.read_only {
            return Err(FsError::ReadOnly);
        }
        Ok(())
    }

    fn ensure_contained(&self, canonical: &Path) -> Result<(), FsError> {
        if canonical.starts_with(&self.root) {
            Ok(())
        } else {
            Err(FsError::Traversal)
        }
    }

    /// Resolve a request path to a canonical host path that must already
    /// exist. Evaluates all symlinks before the containment check.
    fn resolve_existing(&self, virtual_path: &str) -> Result<PathBuf, FsError> {
        let joined = self.root.join(clean_relative(virtual_path));
        let canonical = fs::canonicalize(&joined).map_err(|e| map_io(virtual_path, e))?;
        self.ensure_contained(&canonical)?;
        Ok(canonical)
    }

    /// Resolve a request path that may not exist yet: canonicalize the
    /// nearest existing ancestor, check containment, and re-append the
    /// remaining cleaned components.
    fn resolve_creatable(&self, virtual_path: &str) -> Result<PathBuf, FsError> {
        let relative = clean_relative(virtual_path);
        let joined = self.root.join(&relative);

        if fs::symlink_metadata(&joined).is_ok() {
            // Exists (possibly as a symlink): resolve it fully.
            return self.resolve_existing(virtual_path);
        }

        let mut existing = joined.clone();
        let mut tail: Vec<std::ffi::OsString> = Vec::new();
        while fs::symlink_metadata(&existing).is_err() {
            match existing.file_name() {
                Some(name) => {
                    tail.push(name.to_os_string());
                    if !existing.pop() {
                        return Err(FsError::Traversal);
                    }
                }
                None => return Err(FsError::Traversal),
            }
        }

        let canonical = fs::canonicalize(&existing).map_err(|e| map_io(virtual_path, e))?;
        self.ensure_contained(&canonical)?;

        let mut resolved = canonical;
        for part in tail.iter().rev() {
            resolved.push(part);
        }
        Ok(resolved)
    }

    /// Enumerate the children of a directory.
    ///
    /// Symlinked entries are followed: a child whose target is broken or
    /// outside the export root is silently omitted.
    pub fn list(&self, virtual_path: &str) -> Result<Vec<FileInfo>, FsError> {
        let dir = self.resolve_existing(virtual_path)?;
        let meta = fs::metadata(&dir).map_err(|e| map_io(virtual_path, e))?;
        if !meta.is_dir() {
            return Err(FsError::NotDirectory(virtual_path.to_string()));
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| map_io(virtual_path, e))? {
            let entry = entry.map_err(|e| map_io(virtual_path, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();

            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };

            let meta = if file_type.is_symlink() {
                match fs::canonicalize(entry.path()) {
                    Ok(target) if target.starts_with(&self.root) => {
                        match fs::metadata(&target) {
                            Ok(m) => m,
                            Err(_) => continue,
                        }
                    }
                    // Broken link or escape: not listed.
                    _ => continue,
                }
            } else {
                match entry.metadata() {
                    Ok(m) => m,
                    Err(_) => continue,
                }
            };

            files.push(file_info(name, &meta));
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Metadata for one entry.
    pub fn stat(&self, virtual_path: &str) -> Result<FileInfo, FsError> {
        let path = self.resolve_existing(virtual_path)?;
        let meta = fs::metadata(&path).map_err(|e| map_io(virtual_path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        Ok(file_info(name, &meta))
    }

    /// Ranged read.
    ///
    /// `offset` must lie in `[0, size]`; a non-positive `length`, or one
    /// reaching past end of file, reads to the end. Every read is capped at
    /// 10 MiB and the returned buffer is truncated to what was actually
    /// read.
    pub fn read(&self, virtual_path: &str, offset: i64, length: i64) -> Result<Vec<u8>, FsError> {
        let path = self.resolve_existing(virtual_path)?;
        let meta = fs::metadata(&path).map_err(|e| map_io(virtual_path, e))?;
        if meta.is_dir() {
            return Err(FsError::IsDirectory(virtual_path.to_string()));
        }

        let size = meta.len() as i64;
        if offset < 0 || offset > size {
            return Err(FsError::InvalidOffset);
        }

        let mut effective = match offset.checked_add(length) {
            Some(end) if length > 0 && end <= size => length,
            _ => size - offset,
        };
        if effective > MAX_READ_CHUNK as i64 {
            effective = MAX_READ_CHUNK as i64;
        }
        let effective = usize::try_from(effective).map_err(|_| FsError::InvalidOffset)?;

        let mut file = fs::File::open(&path).map_err(|e| map_io(virtual_path, e))?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|e| map_io(virtual_path, e))?;

        let mut buf = vec![0u8; effective];
        let mut filled = 0;
        while filled < effective {
            let n = file
                .read(&mut buf[filled..])
                .map_err(|e| map_io(virtual_path, e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Positioned write, creating the file if missing. Forbidden on a
    /// read-only share.
    pub fn write(&self, virtual_path: &str, offset: i64, data: &[u8]) -> Result<i64, FsError> {
        self.ensure_writable()?;
        if offset < 0 {
            return Err(FsError::InvalidOffset);
        }

        let path = self.resolve_creatable(virtual_path)?;
        if path.is_dir() {
            return Err(FsError::IsDirectory(virtual_path.to_string()));
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true);
        #[cfg(unix)]
        options.mode(crate::core::DEFAULT_FILE_MODE);

        let mut file = options.open(&path).map_err(|e| map_io(virtual_path, e))?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(|e| map_io(virtual_path, e))?;
        file.write_all(data).map_err(|e| map_io(virtual_path, e))?;
        Ok(data.len() as i64)
    }

    /// Recursive removal. Refuses the export root itself; forbidden on a
    /// read-only share.
    pub fn delete(&self, virtual_path: &str) -> Result<(), FsError> {
        self.ensure_writable()?;

        let path = self.resolve_existing(virtual_path)?;
        if path == self.root {
            return Err(FsError::Traversal);
        }

        let meta = fs::metadata(&path).map_err(|e| map_io(virtual_path, e))?;
        if meta.is_dir() {
            fs::remove_dir_all(&path).map_err(|e| map_io(virtual_path, e))
        } else {
            fs::remove_file(&path).map_err(|e| map_io(virtual_path, e))
        }
    }

    /// Rename within the export root. Neither endpoint may be the root;
    /// forbidden on a read-only share.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<(), FsError> {
        self.ensure_writable()?;

        let from = self.resolve_existing(old_path)?;
        let to = self.resolve_creatable(new_path)?;
        if from == self.root || to == self.root {
            return Err(FsError::Traversal);
        }

        fs::rename(&from, &to).map_err(|e| map_io(old_path, e))
    }

    /// Create a directory, parents included. Forbidden on a read-only
    /// share.
    pub fn mkdir(&self, virtual_path: &str, perm: u32) -> Result<(), FsError> {
        self.ensure_writable()?;

        let path = self.resolve_creatable(virtual_path)?;
        if path == self.root {
            return Err(FsError::AlreadyExists(virtual_path.to_string()));
        }

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(perm);
        #[cfg(not(unix))]
        let _ = perm;

        builder.create(&path).map_err(|e| map_io(virtual_path, e))
    }
}

/// Lexically clean a request path into a relative path: drop `.` and any
/// root/prefix marker, and collapse `..` without ever escaping upward.
fn clean_relative(virtual_path: &str) -> PathBuf {
    let mut stack: Vec<std::ffi::OsString> = Vec::new();
    for component in Path::new(virtual_path).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                stack.pop();
            }
            Component::Normal(part) => stack.push(part.to_os_string()),
        }
    }
    stack.iter().collect()
}

fn file_info(name: String, meta: &fs::Metadata) -> FileInfo {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    #[cfg(unix)]
    let mode = meta.permissions().mode();
    #[cfg(not(unix))]
    let mode = 0;

    FileInfo {
        name,
        size: meta.len() as i64,
        mode,
        mtime,
        is_dir: meta.is_dir(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn staged() -> (TempDir, SecureFs) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("export");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("hello.txt"), b"hi").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/inner.txt"), b"inner data").unwrap();
        // Poison file outside the export root; nothing may ever open it.
        fs::write(tmp.path().join("poison.txt"), b"poison").unwrap();
        let sfs = SecureFs::new(&root, false).unwrap();
        (tmp, sfs)
    }

    #[test]
    fn test_list_root() {
        let (_tmp, sfs) = staged();
        let files = sfs.list("/").unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["hello.txt", "sub"]);

        let hello = &files[0];
        assert_eq!(hello.size, 2);
        assert!(!hello.is_dir);
        assert!(files[1].is_dir);
    }

    #[test]
    fn test_stat() {
        let (_tmp, sfs) = staged();
        let info = sfs.stat("/hello.txt").unwrap();
        assert_eq!(info.name, "hello.txt");
        assert_eq!(info.size, 2);
        assert!(!info.is_dir);

        assert!(matches!(
            sfs.stat("/missing.txt"),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_dotdot_traversal_rejected_but_poison_unreachable() {
        let (_tmp, sfs) = staged();
        // ".." collapses against the virtual root, so this resolves to a
        // nonexistent name inside the export, never to the poison file.
        let err = sfs.read("/../poison.txt", 0, 100).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_) | FsError::Traversal));

        let err = sfs.read("/../../../../etc/passwd", 0, 100).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_) | FsError::Traversal));
    }

    #[test]
    fn test_absolute_path_is_reanchored() {
        let (_tmp, sfs) = staged();
        // A literal absolute path is stripped to a relative one.
        let err = sfs.read("/etc/passwd", 0, 100).unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));

        // And an absolute path naming a real entry still works.
        assert_eq!(sfs.read("/hello.txt", 0, 2).unwrap(), b"hi");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_hidden_and_rejected() {
        let (tmp, sfs) = staged();
        std::os::unix::fs::symlink(tmp.path().join("poison.txt"), sfs.root().join("evil"))
            .unwrap();
        std::os::unix::fs::symlink("hello.txt", sfs.root().join("good")).unwrap();
        std::os::unix::fs::symlink("nowhere", sfs.root().join("broken")).unwrap();

        // Listing omits the escape and the broken link, keeps the safe one.
        let names: Vec<_> = sfs
            .list("/")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert!(!names.contains(&"evil".to_string()));
        assert!(!names.contains(&"broken".to_string()));
        assert!(names.contains(&"good".to_string()));

        // Direct access through the escape is a traversal error.
        assert!(matches!(sfs.stat("/evil"), Err(FsError::Traversal)));
        assert!(matches!(sfs.read("/evil", 0, 10), Err(FsError::Traversal)));

        // The safe link resolves normally.
        assert_eq!(sfs.read("/good", 0, 2).unwrap(), b"hi");
    }

    #[test]
    fn test_read_offset_and_length_rules() {
        let (_tmp, sfs) = staged();

        assert_eq!(sfs.read("/hello.txt", 0, 2).unwrap(), b"hi");
        assert_eq!(sfs.read("/hello.txt", 1, 1).unwrap(), b"i");

        // offset == size is legal and yields nothing.
        assert_eq!(sfs.read("/hello.txt", 2, 1).unwrap(), b"");

        // Non-positive length reads to end of file.
        assert_eq!(sfs.read("/hello.txt", 0, 0).unwrap(), b"hi");
        assert_eq!(sfs.read("/hello.txt", 0, -1).unwrap(), b"hi");

        // Over-long length clamps to what remains.
        assert_eq!(sfs.read("/hello.txt", 1, 100).unwrap(), b"i");

        // Out-of-range offsets are errors.
        assert!(matches!(
            sfs.read("/hello.txt", -1, 1),
            Err(FsError::InvalidOffset)
        ));
        assert!(matches!(
            sfs.read("/hello.txt", 3, 1),
            Err(FsError::InvalidOffset)
        ));

        // offset + length overflow must clamp, not wrap.
        assert_eq!(sfs.read("/hello.txt", 1, i64::MAX).unwrap(), b"i");
    }

    #[test]
    fn test_read_directory_rejected() {
        let (_tmp, sfs) = staged();
        assert!(matches!(
            sfs.read("/sub", 0, 10),
            Err(FsError::IsDirectory(_))
        ));
    }

    #[test]
    fn test_write_create_and_update() {
        let (_tmp, sfs) = staged();

        assert_eq!(sfs.write("/new.txt", 0, b"fresh").unwrap(), 5);
        assert_eq!(sfs.read("/new.txt", 0, 0).unwrap(), b"fresh");

        // Positioned overwrite.
        sfs.write("/new.txt", 2, b"og").unwrap();
        assert_eq!(sfs.read("/new.txt", 0, 0).unwrap(), b"frogh");

        // Writing into a missing subdirectory fails resolution cleanly.
        assert!(sfs.write("/nosuch/dir/file.txt", 0, b"x").is_err());

        assert!(matches!(
            sfs.write("/new.txt", -1, b"x"),
            Err(FsError::InvalidOffset)
        ));
    }

    #[test]
    fn test_delete() {
        let (_tmp, sfs) = staged();

        sfs.delete("/hello.txt").unwrap();
        assert!(matches!(
            sfs.stat("/hello.txt"),
            Err(FsError::NotFound(_))
        ));

        // Recursive directory removal.
        sfs.delete("/sub").unwrap();
        assert!(sfs.stat("/sub").is_err());

        // The export root itself is off limits.
        assert!(matches!(sfs.delete("/"), Err(FsError::Traversal)));
        assert!(matches!(sfs.delete("/.."), Err(FsError::Traversal)));
    }

    #[test]
    fn test_rename() {
        let (_tmp, sfs) = staged();

        sfs.rename("/hello.txt", "/renamed.txt").unwrap();
        assert!(sfs.stat("/hello.txt").is_err());
        assert_eq!(sfs.read("/renamed.txt", 0, 0).unwrap(), b"hi");

        assert!(matches!(
            sfs.rename("/", "/elsewhere"),
            Err(FsError::Traversal)
        ));
        assert!(matches!(
            sfs.rename("/renamed.txt", "/"),
            Err(FsError::Traversal)
        ));
    }

    #[test]
    fn test_mkdir_with_parents() {
        let (_tmp, sfs) = staged();

        sfs.mkdir("/a/b/c", 0o755).unwrap();
        let info = sfs.stat("/a/b/c").unwrap();
        assert!(info.is_dir);
    }

    #[test]
    fn test_read_only_rejects_mutations() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("keep.txt"), b"data").unwrap();
        let sfs = SecureFs::new(tmp.path(), true).unwrap();

        assert!(matches!(
            sfs.write("/x", 0, b"y"),
            Err(FsError::ReadOnly)
        ));
        assert!(matches!(sfs.delete("/keep.txt"), Err(FsError::ReadOnly)));
        assert!(matches!(
            sfs.rename("/keep.txt", "/moved.txt"),
            Err(FsError::ReadOnly)
        ));
        assert!(matches!(sfs.mkdir("/d", 0o755), Err(FsError::ReadOnly)));

        // Reads still work.
        assert_eq!(sfs.read("/keep.txt", 0, 0).unwrap(), b"data");
        assert!(sfs.list("/").is_ok());

        // And the policy failure maps to a permission error on the wire.
        assert_eq!(
            sfs.write("/x", 0, b"y").unwrap_err().code(),
            ErrorCode::PermissionDenied
        );
    }

    #[test]
    fn test_error_text_never_names_the_root() {
        let (_tmp, sfs) = staged();
        let root_text = sfs.root().to_string_lossy().into_owned();

        let errors = [
            sfs.read("/missing", 0, 1).unwrap_err(),
            sfs.read("/../../etc/shadow", 0, 1).unwrap_err(),
            sfs.delete("/").unwrap_err(),
        ];
        for err in errors {
            assert!(!err.to_string().contains(&root_text));
        }
    }

    #[test]
    fn test_clean_relative() {
        assert_eq!(clean_relative("/a/b/c"), PathBuf::from("a/b/c"));
        assert_eq!(clean_relative("a//b/./c"), PathBuf::from("a/b/c"));
        assert_eq!(clean_relative("/../../a"), PathBuf::from("a"));
        assert_eq!(clean_relative("a/b/../c"), PathBuf::from("a/c"));
        assert_eq!(clean_relative("/"), PathBuf::new());
        assert_eq!(clean_relative(""), PathBuf::new());
    }
}
