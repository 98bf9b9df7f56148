//! Named shared-memory frame buffer with a process-shared lock and a
//! condition variable for waking readers.

use std::fs::File;
use std::io;
use std::mem::MaybeUninit;
use std::ptr::{self, addr_of_mut};
use std::time::Duration;

use memmap2::MmapMut;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use thiserror::Error;
use tracing::{debug, warn};

use super::layout::{bytes_for_segment, data_offset, SegmentHeader, SEGMENT_MAGIC, SEGMENT_VERSION};
use super::timestamp::Timestamp;

/// POSIX limit on shared memory object names
const NAME_MAX: usize = 255;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("invalid shared memory name {0:?}")]
    InvalidName(String),
    #[error("shared memory '{0}' needs a non-zero capacity")]
    ZeroCapacity(String),
    #[error("failed to create shared memory '{name}'")]
    Create {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to open shared memory '{name}'")]
    Open {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("shared memory '{name}' is not a frame buffer: {reason}")]
    Invalid { name: String, reason: &'static str },
    #[error("synchronisation on shared memory '{name}' failed")]
    Sync {
        name: String,
        #[source]
        source: io::Error,
    },
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

fn os_name(name: &str) -> Result<String, BufferError> {
    let bare = name.strip_prefix('/').unwrap_or(name);
    if bare.is_empty() || bare.len() > NAME_MAX - 1 || bare.contains(['/', '\0']) {
        return Err(BufferError::InvalidName(name.to_string()));
    }
    Ok(format!("/{bare}"))
}

fn monotonic_deadline(timeout: Duration) -> libc::timespec {
    let mut now = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // CLOCK_MONOTONIC cannot fail with a valid pointer
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };

    let nanos = now.tv_nsec as u64 + timeout.subsec_nanos() as u64;
    let tv_sec = libc::time_t::try_from(timeout.as_secs())
        .ok()
        .and_then(|secs| now.tv_sec.checked_add(secs))
        .and_then(|secs| secs.checked_add((nanos / 1_000_000_000) as libc::time_t));
    match tv_sec {
        Some(tv_sec) => libc::timespec {
            tv_sec,
            tv_nsec: (nanos % 1_000_000_000) as _,
        },
        // Too far out to represent: wait as long as the clock can count
        None => libc::timespec {
            tv_sec: libc::time_t::MAX,
            tv_nsec: 999_999_999,
        },
    }
}

/// A fixed-capacity frame buffer living in a POSIX shared memory segment.
///
/// The creating handle owns the segment name and unlinks it on drop; handles
/// from [`SharedFrameBuffer::open`] only detach.
pub struct SharedFrameBuffer {
    name: String,
    os_name: String,
    capacity: usize,
    owner: bool,
    /// Keeps the mapping alive; all access goes through `base`.
    _mmap: MmapMut,
    base: *mut u8,
}

// SAFETY: the mapping is owned by the handle and every access to shared
// state goes through the process-shared mutex in the header.
unsafe impl Send for SharedFrameBuffer {}

impl SharedFrameBuffer {
    /// Creates the segment `name` with room for `capacity` frame bytes.
    ///
    /// A segment of the same name left behind by a crashed producer is
    /// replaced.
    pub fn create(name: &str, capacity: usize) -> Result<Self, BufferError> {
        let os_name = os_name(name)?;
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity(name.to_string()));
        }
        let create_err = |source: io::Error| BufferError::Create {
            name: name.to_string(),
            source,
        };

        let flags = OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR;
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;
        let fd = match shm_open(os_name.as_str(), flags, mode) {
            Err(Errno::EEXIST) => {
                warn!("Replacing stale shared memory '{}'", name);
                shm_unlink(os_name.as_str()).map_err(|e| create_err(e.into()))?;
                shm_open(os_name.as_str(), flags, mode)
            }
            other => other,
        }
        .map_err(|e| create_err(e.into()))?;

        // From here on a failure must not leave the name behind
        let unlink_on_err = |source: io::Error| {
            let _ = shm_unlink(os_name.as_str());
            create_err(source)
        };

        let file = File::from(fd);
        file.set_len(bytes_for_segment(capacity) as u64)
            .map_err(unlink_on_err)?;
        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(unlink_on_err)?;
        let base = mmap.as_mut_ptr();

        // SAFETY: the segment was just created exclusively and is large
        // enough for the header; nobody else can have it mapped yet with a
        // valid magic.
        unsafe { init_header(base as *mut SegmentHeader, capacity) }.map_err(unlink_on_err)?;

        debug!("Created shared memory '{}' ({} bytes)", name, capacity);

        Ok(Self {
            name: name.to_string(),
            os_name,
            capacity,
            owner: true,
            _mmap: mmap,
            base,
        })
    }

    /// Attaches to an existing segment created by a producer.
    pub fn open(name: &str) -> Result<Self, BufferError> {
        let os_name = os_name(name)?;
        let open_err = |source: io::Error| BufferError::Open {
            name: name.to_string(),
            source,
        };

        let fd = shm_open(os_name.as_str(), OFlag::O_RDWR, Mode::empty())
            .map_err(|e| open_err(e.into()))?;
        let file = File::from(fd);
        let mapped = file.metadata().map_err(open_err)?.len() as usize;
        if mapped < data_offset() {
            return Err(BufferError::Invalid {
                name: name.to_string(),
                reason: "segment smaller than header",
            });
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(open_err)?;
        let base = mmap.as_mut_ptr();

        // SAFETY: mapping is at least header sized; the immutable prefix of
        // the header is written once by the creator before any reader can
        // see a valid magic.
        let header = unsafe { &*(base as *const SegmentHeader) };
        header.validate(mapped).map_err(|reason| BufferError::Invalid {
            name: name.to_string(),
            reason,
        })?;

        Ok(Self {
            name: name.to_string(),
            os_name,
            capacity: header.capacity as usize,
            owner: false,
            _mmap: mmap,
            base,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    fn header(&self) -> *mut SegmentHeader {
        self.base as *mut SegmentHeader
    }

    #[inline(always)]
    fn mutex(&self) -> *mut libc::pthread_mutex_t {
        // SAFETY: base points at an initialised header for the handle's lifetime
        unsafe { addr_of_mut!((*self.header()).mutex) }
    }

    #[inline(always)]
    fn cond(&self) -> *mut libc::pthread_cond_t {
        // SAFETY: as above
        unsafe { addr_of_mut!((*self.header()).cond) }
    }

    fn sync_err(&self, rc: libc::c_int) -> BufferError {
        BufferError::Sync {
            name: self.name.clone(),
            source: io::Error::from_raw_os_error(rc),
        }
    }

    /// Recovers the mutex after its previous owner died holding it.
    fn recover(&self) -> Result<(), BufferError> {
        warn!("Previous holder of '{}' died with the lock held; recovering", self.name);
        let rc = unsafe { libc::pthread_mutex_consistent(self.mutex()) };
        if rc == 0 {
            Ok(())
        } else {
            Err(self.sync_err(rc))
        }
    }

    /// Acquires the segment lock. The lock is released when the returned
    /// guard is dropped.
    pub fn lock(&mut self) -> Result<FrameGuard<'_>, BufferError> {
        match unsafe { libc::pthread_mutex_lock(self.mutex()) } {
            0 => {}
            libc::EOWNERDEAD => self.recover()?,
            rc => return Err(self.sync_err(rc)),
        }
        Ok(FrameGuard { buffer: self })
    }

    /// Wakes every reader blocked in [`SharedFrameBuffer::wait_newer`].
    ///
    /// Takes `&self`, so it cannot run while a [`FrameGuard`] borrowed from
    /// this buffer is alive: readers are only woken after the lock is
    /// released.
    pub fn notify_all(&self) -> Result<(), BufferError> {
        match unsafe { libc::pthread_cond_broadcast(self.cond()) } {
            0 => Ok(()),
            rc => Err(self.sync_err(rc)),
        }
    }

    /// Blocks until a frame with a timestamp newer than `after` is published
    /// or `timeout` expires. On success the lock is held by the returned
    /// guard, so the frame can be read without racing the producer.
    pub fn wait_newer(
        &mut self,
        after: Timestamp,
        timeout: Duration,
    ) -> Result<Option<FrameGuard<'_>>, BufferError> {
        let deadline = monotonic_deadline(timeout);
        let mut guard = self.lock()?;
        loop {
            if guard.timestamp() > after {
                return Ok(Some(guard));
            }
            if guard.wait_until(&deadline)? {
                return Ok((guard.timestamp() > after).then_some(guard));
            }
        }
    }
}

impl Drop for SharedFrameBuffer {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = shm_unlink(self.os_name.as_str()) {
                warn!("Failed to unlink shared memory '{}': {}", self.name, e);
            }
        }
    }
}

/// Initialises a freshly created segment header.
///
/// # Safety
/// `header` must point to writable, exclusively owned memory of at least
/// `size_of::<SegmentHeader>()` bytes.
unsafe fn init_header(header: *mut SegmentHeader, capacity: usize) -> io::Result<()> {
    let mut mattr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
    check(libc::pthread_mutexattr_init(mattr.as_mut_ptr()))?;
    let rc = (|| {
        check(libc::pthread_mutexattr_setpshared(mattr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED))?;
        check(libc::pthread_mutexattr_setrobust(mattr.as_mut_ptr(), libc::PTHREAD_MUTEX_ROBUST))?;
        check(libc::pthread_mutex_init(addr_of_mut!((*header).mutex), mattr.as_ptr()))
    })();
    libc::pthread_mutexattr_destroy(mattr.as_mut_ptr());
    rc?;

    let mut cattr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
    check(libc::pthread_condattr_init(cattr.as_mut_ptr()))?;
    let rc = (|| {
        check(libc::pthread_condattr_setpshared(cattr.as_mut_ptr(), libc::PTHREAD_PROCESS_SHARED))?;
        check(libc::pthread_condattr_setclock(cattr.as_mut_ptr(), libc::CLOCK_MONOTONIC))?;
        check(libc::pthread_cond_init(addr_of_mut!((*header).cond), cattr.as_ptr()))
    })();
    libc::pthread_condattr_destroy(cattr.as_mut_ptr());
    rc?;

    ptr::write(addr_of_mut!((*header).timestamp_us), Timestamp::ZERO.as_micros());
    ptr::write(addr_of_mut!((*header).capacity), capacity as u64);
    ptr::write(addr_of_mut!((*header).data_offset), data_offset() as u64);
    ptr::write(addr_of_mut!((*header).version), SEGMENT_VERSION);
    // Magic last: readers treat the segment as valid only once it is set
    ptr::write_volatile(addr_of_mut!((*header).magic), SEGMENT_MAGIC);
    Ok(())
}

/// Exclusive access to a locked frame buffer.
///
/// Content and timestamp may only be touched through a guard; dropping it
/// unlocks the segment.
pub struct FrameGuard<'a> {
    buffer: &'a mut SharedFrameBuffer,
}

impl FrameGuard<'_> {
    pub fn timestamp(&self) -> Timestamp {
        // SAFETY: lock held
        Timestamp::from_micros(unsafe { (*self.buffer.header()).timestamp_us })
    }

    pub fn set_timestamp(&mut self, ts: Timestamp) {
        // SAFETY: lock held
        unsafe { (*self.buffer.header()).timestamp_us = ts.as_micros() };
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity
    }

    pub fn data(&self) -> &[u8] {
        // SAFETY: data region lies inside the mapping; lock held
        unsafe { std::slice::from_raw_parts(self.buffer.base.add(data_offset()), self.buffer.capacity) }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and the guard is the only path to the bytes
        unsafe { std::slice::from_raw_parts_mut(self.buffer.base.add(data_offset()), self.buffer.capacity) }
    }

    /// Copies `bytes` into the frame at `offset`.
    ///
    /// # Panics
    /// When the write would run past the buffer's capacity.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.buffer.capacity);
        assert!(
            end.is_some(),
            "write of {} bytes at {} overruns '{}' ({} bytes)",
            bytes.len(),
            offset,
            self.buffer.name,
            self.buffer.capacity
        );
        self.data_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Returns `true` when the deadline passed without a wakeup.
    fn wait_until(&mut self, deadline: &libc::timespec) -> Result<bool, BufferError> {
        let rc = unsafe { libc::pthread_cond_timedwait(self.buffer.cond(), self.buffer.mutex(), deadline) };
        match rc {
            0 => Ok(false),
            libc::ETIMEDOUT => Ok(true),
            libc::EOWNERDEAD => self.buffer.recover().map(|_| false),
            rc => Err(self.buffer.sync_err(rc)),
        }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let rc = unsafe { libc::pthread_mutex_unlock(self.buffer.mutex()) };
        if rc != 0 {
            warn!("Failed to unlock '{}': {}", self.buffer.name, io::Error::from_raw_os_error(rc));
        }
    }
}
