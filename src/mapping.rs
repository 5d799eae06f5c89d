use std::{
    fs::OpenOptions,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
    ptr::NonNull,
};

use bytemuck::Pod;
use memmap::{MmapMut, MmapOptions};

use crate::Result;

/// A file that is `mmap`-ed in full (shared, read-write) and viewed as a single `T`. The file is created if
/// needed and resized to exactly `size_of::<T>()` bytes, newly added bytes read as zeros, which is a valid
/// `T` since it's [Pod]. Dropping it unmaps the file; nothing is explicitly flushed.
pub(crate) struct MappedFile<T: Pod> {
    path: PathBuf,
    ptr: NonNull<T>,
    mmap: MmapMut,
    _phantom: PhantomData<T>,
}

// the mapping is owned by this object and only reachable through it, so it's exactly as thread-safe as `T`
unsafe impl<T: Pod + Send> Send for MappedFile<T> {}
unsafe impl<T: Pod + Sync> Sync for MappedFile<T> {}

impl<T: Pod> MappedFile<T> {
    pub(crate) const SIZE: usize = size_of::<T>();

    pub(crate) fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if file.metadata()?.len() != Self::SIZE as u64 {
            file.set_len(Self::SIZE as u64)?;
        }

        let mut mmap = unsafe { MmapOptions::new().len(Self::SIZE).map_mut(&file) }?;
        // mmap returns page-aligned memory, anything we store needs less than that
        const { assert!(align_of::<T>() <= 4096) };
        let ptr = NonNull::new(mmap.as_mut_ptr() as *mut T)
            .ok_or_else(|| anyhow::anyhow!("mmap of {} returned null", path.display()))?;

        // the file descriptor can be closed now, the mapping keeps the file alive
        Ok(Self {
            path,
            ptr,
            mmap,
            _phantom: PhantomData,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Asks the OS to write back dirty pages. Not needed for other processes to see our writes
    pub(crate) fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}

impl<T: Pod> Deref for MappedFile<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // the pointer is valid and aligned for as long as the mapping lives, and `&self` prevents
        // anyone in this process from mutating it meanwhile
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Pod> DerefMut for MappedFile<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Counters {
        a: u64,
        b: [u32; 6],
    }

    fn tempdir() -> PathBuf {
        let rand: u64 = rand::random();
        let dir = std::env::temp_dir().join(format!("listingsdb-mapping-{rand}"));
        _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_create_and_reopen() -> Result<()> {
        let dir = tempdir();
        let path = dir.join("counters");

        {
            let mut m = MappedFile::<Counters>::open(&path)?;
            assert_eq!(std::fs::metadata(&path)?.len(), 32);
            assert_eq!(m.a, 0);
            assert_eq!(m.b, [0; 6]);
            m.a = 1234;
            m.b[5] = 77;
        }

        let m = MappedFile::<Counters>::open(&path)?;
        assert_eq!(m.a, 1234);
        assert_eq!(m.b[5], 77);
        assert_eq!(m.path(), path.as_path());
        m.flush()?;

        _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[test]
    fn test_resizes_to_exact_size() -> Result<()> {
        let dir = tempdir();

        let short = dir.join("short");
        std::fs::write(&short, [0xffu8; 8])?;
        let m = MappedFile::<Counters>::open(&short)?;
        assert_eq!(std::fs::metadata(&short)?.len(), 32);
        assert_eq!(m.a, u64::MAX);
        assert_eq!(m.b, [0; 6]);

        let long = dir.join("long");
        std::fs::write(&long, [1u8; 100])?;
        let m = MappedFile::<Counters>::open(&long)?;
        assert_eq!(std::fs::metadata(&long)?.len(), 32);
        assert_eq!(m.b[5], 0x01010101);

        assert!(MappedFile::<Counters>::open(dir.join("missing/nested")).is_err());

        _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }
}
