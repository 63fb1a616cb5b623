//! POSIX-style error taxonomy shared by every fallible operation in the engine.

use std::fmt;

/// The fixed set of error kinds the engine can surface, each carrying its
/// conventional negative errno value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FsErrorKind {
    EPerm,
    ENoEnt,
    EAccess,
    EExist,
    ENotDir,
    EIsDir,
    EInval,
    ENotEmpty,
    EBadF,
    ELoop,
    ENameTooLong,
    ENoSpc,
    ERoFs,
    EBusy,
    EMFile,
    ENFile,
    EXDev,
}

impl FsErrorKind {
    /// The fixed negative errno associated with this kind.
    pub fn errno(self) -> i32 {
        use FsErrorKind::*;
        match self {
            EPerm => -1,
            ENoEnt => -2,
            EAccess => -13,
            EExist => -17,
            ENotDir => -20,
            EIsDir => -21,
            EInval => -22,
            ENotEmpty => -39,
            EBadF => -9,
            ELoop => -40,
            ENameTooLong => -36,
            ENoSpc => -28,
            ERoFs => -30,
            EBusy => -16,
            EMFile => -24,
            ENFile => -23,
            EXDev => -18,
        }
    }

    /// The POSIX error code token, e.g. `"ENOENT"`.
    pub fn code(self) -> &'static str {
        use FsErrorKind::*;
        match self {
            EPerm => "EPERM",
            ENoEnt => "ENOENT",
            EAccess => "EACCES",
            EExist => "EEXIST",
            ENotDir => "ENOTDIR",
            EIsDir => "EISDIR",
            EInval => "EINVAL",
            ENotEmpty => "ENOTEMPTY",
            EBadF => "EBADF",
            ELoop => "ELOOP",
            ENameTooLong => "ENAMETOOLONG",
            ENoSpc => "ENOSPC",
            ERoFs => "EROFS",
            EBusy => "EBUSY",
            EMFile => "EMFILE",
            ENFile => "ENFILE",
            EXDev => "EXDEV",
        }
    }

    /// The fixed human-readable text for this kind.
    pub fn text(self) -> &'static str {
        use FsErrorKind::*;
        match self {
            EPerm => "operation not permitted",
            ENoEnt => "no such file or directory",
            EAccess => "permission denied",
            EExist => "file already exists",
            ENotDir => "not a directory",
            EIsDir => "is a directory",
            EInval => "invalid argument",
            ENotEmpty => "directory not empty",
            EBadF => "bad file descriptor",
            ELoop => "too many symbolic links encountered",
            ENameTooLong => "name too long",
            ENoSpc => "no space left on device",
            ERoFs => "read-only file system",
            EBusy => "resource busy or locked",
            EMFile => "too many open files",
            ENFile => "too many open files in system",
            EXDev => "cross-device link not permitted",
        }
    }
}

/// A fully-populated filesystem error: kind plus call-site context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FsError {
    pub kind: FsErrorKind,
    pub syscall: Option<&'static str>,
    pub path: Option<String>,
    pub dest: Option<String>,
}

impl FsError {
    pub fn new(kind: FsErrorKind) -> Self {
        Self { kind, syscall: None, path: None, dest: None }
    }

    pub fn with_syscall(mut self, syscall: &'static str) -> Self {
        self.syscall = Some(syscall);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    pub fn errno(&self) -> i32 {
        self.kind.errno()
    }

    pub fn no_ent(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(FsErrorKind::ENoEnt).with_syscall(syscall).with_path(path)
    }

    pub fn exist(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(FsErrorKind::EExist).with_syscall(syscall).with_path(path)
    }

    pub fn is_dir(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(FsErrorKind::EIsDir).with_syscall(syscall).with_path(path)
    }

    pub fn not_dir(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(FsErrorKind::ENotDir).with_syscall(syscall).with_path(path)
    }

    pub fn inval(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(FsErrorKind::EInval).with_syscall(syscall).with_path(path)
    }

    pub fn loop_(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(FsErrorKind::ELoop).with_syscall(syscall).with_path(path)
    }

    pub fn not_empty(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(FsErrorKind::ENotEmpty).with_syscall(syscall).with_path(path)
    }

    pub fn busy(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(FsErrorKind::EBusy).with_syscall(syscall).with_path(path)
    }

    /// Map a `std::io::Error` crossing a backend boundary into the taxonomy.
    pub fn from_io(err: &std::io::Error, syscall: &'static str, path: impl Into<String>) -> Self {
        use std::io::ErrorKind as IoKind;
        let kind = match err.kind() {
            IoKind::NotFound => FsErrorKind::ENoEnt,
            IoKind::PermissionDenied => FsErrorKind::EAccess,
            IoKind::AlreadyExists => FsErrorKind::EExist,
            IoKind::InvalidInput | IoKind::InvalidData => FsErrorKind::EInval,
            _ => match err.raw_os_error() {
                Some(20) => FsErrorKind::ENotDir,
                Some(21) => FsErrorKind::EIsDir,
                Some(39) => FsErrorKind::ENotEmpty,
                Some(28) => FsErrorKind::ENoSpc,
                Some(30) => FsErrorKind::ERoFs,
                _ => FsErrorKind::EPerm,
            },
        };
        Self::new(kind).with_syscall(syscall).with_path(path)
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.kind.text())?;
        if let Some(syscall) = self.syscall {
            let path = self.path.as_deref().unwrap_or("");
            write!(f, ", {} '{}'", syscall, path)?;
            if let Some(dest) = &self.dest {
                write!(f, " -> '{}'", dest)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for FsError {}

pub type FsResult<T> = Result<T, FsError>;
