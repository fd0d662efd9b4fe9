#![allow(dead_code)]

use std::io::SeekFrom;
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Condvar, Mutex};

use lockfs::memfs::MemFile;
use lockfs::{
    DirEntry, File, FileSystem, Filer, MemFs, Metadata, OpenFlags, Result, SymlinkFileSystem,
};

/// How long a test waits for something that should happen promptly.
pub const PROMPT: Duration = Duration::from_secs(5);

/// How long a test waits to convince itself that something stays blocked.
pub const SETTLE: Duration = Duration::from_millis(150);

/// Run `f` on its own thread and panic if it does not finish within `timeout`.
/// Used wherever a locking bug would otherwise hang the test run.
pub fn within<T: Send + 'static>(timeout: Duration, f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(timeout)
        .unwrap_or_else(|_| panic!("operation did not finish within {:?}", timeout))
}

/// Counts overlapping calls by mode and flags any overlap that an
/// exclusive call should have prevented.
#[derive(Default)]
pub struct Tracker {
    readers: AtomicUsize,
    writers: AtomicUsize,
    max_readers: AtomicUsize,
    violations: AtomicUsize,
    calls: AtomicUsize,
}

pub struct Entered<'a> {
    tracker: &'a Tracker,
    exclusive: bool,
}

impl Tracker {
    pub fn shared(&self) -> Entered<'_> {
        self.calls.fetch_add(1, SeqCst);
        let readers = self.readers.fetch_add(1, SeqCst) + 1;
        self.max_readers.fetch_max(readers, SeqCst);
        if self.writers.load(SeqCst) > 0 {
            self.violations.fetch_add(1, SeqCst);
        }
        Entered {
            tracker: self,
            exclusive: false,
        }
    }

    pub fn exclusive(&self) -> Entered<'_> {
        self.calls.fetch_add(1, SeqCst);
        let writers = self.writers.fetch_add(1, SeqCst) + 1;
        if writers > 1 || self.readers.load(SeqCst) > 0 {
            self.violations.fetch_add(1, SeqCst);
        }
        Entered {
            tracker: self,
            exclusive: true,
        }
    }

    /// Calls that overlapped an exclusive call.
    pub fn violations(&self) -> usize {
        self.violations.load(SeqCst)
    }

    pub fn max_readers(&self) -> usize {
        self.max_readers.load(SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(SeqCst)
    }
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        if self.exclusive {
            self.tracker.writers.fetch_sub(1, SeqCst);
        } else {
            self.tracker.readers.fetch_sub(1, SeqCst);
        }
    }
}

/// Meeting point for `parties` threads. Arriving returns true only if every
/// party arrived before the timeout, which proves the callers were inside
/// their critical sections at the same time.
pub struct Rendezvous {
    parties: usize,
    arrived: Mutex<usize>,
    cv: Condvar,
}

impl Rendezvous {
    pub fn new(parties: usize) -> Arc<Self> {
        Arc::new(Rendezvous {
            parties,
            arrived: Mutex::new(0),
            cv: Condvar::new(),
        })
    }

    pub fn arrive(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut arrived = self.arrived.lock();
        *arrived += 1;
        if *arrived >= self.parties {
            self.cv.notify_all();
            return true;
        }
        while *arrived < self.parties {
            if self.cv.wait_until(&mut arrived, deadline).timed_out() {
                return *arrived >= self.parties;
            }
        }
        true
    }
}

#[derive(Default)]
struct GateState {
    armed: Option<String>,
    entered: bool,
    open: bool,
}

/// Holds the first call on an armed name inside its critical section until
/// the test opens the gate.
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl Gate {
    pub fn arm(&self, name: &str) {
        let mut state = self.state.lock();
        *state = GateState {
            armed: Some(name.to_string()),
            entered: false,
            open: false,
        };
    }

    /// Block while the call for the armed name is held at the gate.
    fn pass(&self, name: &str) {
        let mut state = self.state.lock();
        if state.armed.as_deref() != Some(name) || state.entered {
            return;
        }
        state.entered = true;
        self.cv.notify_all();
        while !state.open {
            self.cv.wait(&mut state);
        }
    }

    /// Wait until the armed call reaches the gate.
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.entered {
            if self.cv.wait_until(&mut state, deadline).timed_out() {
                return state.entered;
            }
        }
        true
    }

    pub fn open(&self) {
        let mut state = self.state.lock();
        state.open = true;
        self.cv.notify_all();
    }
}

/// Instrumentation shared by a `TrackedFs` and every file it opens.
#[derive(Default)]
pub struct Tracking {
    /// Filesystem-level calls: path operations plus the parent-shared part of
    /// every handle operation except `close`.
    pub fs: Tracker,
    /// One tracker per opened handle, in open order.
    handles: Mutex<Vec<Arc<Tracker>>>,
    /// Gate consulted by `mkdir`, `rename` and handle `write`.
    pub gate: Gate,
    rendezvous: Mutex<Option<Arc<Rendezvous>>>,
    met: AtomicUsize,
    hold: Mutex<Duration>,
}

impl Tracking {
    pub fn handle(&self, index: usize) -> Arc<Tracker> {
        self.handles.lock()[index].clone()
    }

    /// Make `fs.stat` and handle `read_at` meet at a rendezvous of `parties`.
    pub fn set_rendezvous(&self, parties: usize) {
        *self.rendezvous.lock() = Some(Rendezvous::new(parties));
    }

    /// Calls that met every other party at the rendezvous.
    pub fn met(&self) -> usize {
        self.met.load(SeqCst)
    }

    /// Time every tracked call spends inside its critical section.
    pub fn set_hold(&self, hold: Duration) {
        *self.hold.lock() = hold;
    }

    fn dwell(&self) {
        let hold = *self.hold.lock();
        if !hold.is_zero() {
            thread::sleep(hold);
        }
    }

    fn meet(&self) {
        let rendezvous = self.rendezvous.lock().clone();
        if let Some(rendezvous) = rendezvous {
            if rendezvous.arrive(PROMPT) {
                self.met.fetch_add(1, SeqCst);
            }
        }
    }
}

/// A `MemFs` that records how its calls overlap.
///
/// `TrackedFs` does no locking of its own, so any overlap it observes between an
/// exclusive call and another call was let through by the wrapper above it.
pub struct TrackedFs {
    inner: MemFs,
    tracking: Arc<Tracking>,
}

impl TrackedFs {
    pub fn new() -> (Self, Arc<Tracking>) {
        let tracking = Arc::new(Tracking::default());
        let fs = TrackedFs {
            inner: MemFs::new(),
            tracking: tracking.clone(),
        };
        (fs, tracking)
    }

    fn wrap(&self, inner: MemFile) -> TrackedFile {
        let handle = Arc::new(Tracker::default());
        self.tracking.handles.lock().push(handle.clone());
        TrackedFile {
            inner,
            tracking: self.tracking.clone(),
            handle,
        }
    }
}

impl Filer for TrackedFs {
    type File = TrackedFile;

    fn open_file(&mut self, name: &str, flags: OpenFlags, perm: u32) -> Result<TrackedFile> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.dwell();
        let file = self.inner.open_file(name, flags, perm)?;
        Ok(self.wrap(file))
    }

    fn mkdir(&mut self, name: &str, perm: u32) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.gate.pass(name);
        self.tracking.dwell();
        self.inner.mkdir(name, perm)
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.dwell();
        self.inner.remove(name)
    }

    fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.gate.pass(old);
        self.tracking.dwell();
        self.inner.rename(old, new)
    }

    fn stat(&self, name: &str) -> Result<Metadata> {
        let _in = self.tracking.fs.shared();
        self.tracking.meet();
        self.tracking.dwell();
        self.inner.stat(name)
    }

    fn chmod(&mut self, name: &str, mode: u32) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.dwell();
        self.inner.chmod(name, mode)
    }

    fn chtimes(&mut self, name: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.dwell();
        self.inner.chtimes(name, atime, mtime)
    }

    fn chown(&mut self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.dwell();
        self.inner.chown(name, uid, gid)
    }

    fn read_dir(&self, name: &str) -> Result<Vec<DirEntry>> {
        let _in = self.tracking.fs.shared();
        self.tracking.dwell();
        self.inner.read_dir(name)
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let _in = self.tracking.fs.shared();
        self.tracking.dwell();
        self.inner.read_file(name)
    }
}

impl FileSystem for TrackedFs {
    fn chdir(&mut self, dir: &str) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.inner.chdir(dir)
    }

    fn getwd(&self) -> Result<String> {
        let _in = self.tracking.fs.shared();
        self.inner.getwd()
    }

    fn temp_dir(&self) -> String {
        let _in = self.tracking.fs.shared();
        self.inner.temp_dir()
    }

    fn open(&self, name: &str) -> Result<TrackedFile> {
        let _in = self.tracking.fs.shared();
        self.tracking.dwell();
        let file = self.inner.open(name)?;
        Ok(self.wrap(file))
    }

    fn mkdir_all(&mut self, name: &str, perm: u32) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.dwell();
        self.inner.mkdir_all(name, perm)
    }

    fn remove_all(&mut self, name: &str) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.dwell();
        self.inner.remove_all(name)
    }

    fn truncate(&mut self, name: &str, size: u64) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.dwell();
        self.inner.truncate(name, size)
    }

    fn write_file(&mut self, name: &str, data: &[u8], perm: u32) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.dwell();
        self.inner.write_file(name, data, perm)
    }
}

impl SymlinkFileSystem for TrackedFs {
    fn lstat(&self, name: &str) -> Result<Metadata> {
        let _in = self.tracking.fs.shared();
        self.tracking.dwell();
        self.inner.lstat(name)
    }

    fn lchown(&mut self, name: &str, uid: u32, gid: u32) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.dwell();
        self.inner.lchown(name, uid, gid)
    }

    fn readlink(&self, name: &str) -> Result<String> {
        let _in = self.tracking.fs.shared();
        self.tracking.dwell();
        self.inner.readlink(name)
    }

    fn symlink(&mut self, target: &str, link: &str) -> Result<()> {
        let _in = self.tracking.fs.exclusive();
        self.tracking.dwell();
        self.inner.symlink(target, link)
    }
}

pub struct TrackedFile {
    inner: MemFile,
    tracking: Arc<Tracking>,
    handle: Arc<Tracker>,
}

impl File for TrackedFile {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let _fs = self.tracking.fs.shared();
        let _in = self.handle.exclusive();
        self.tracking.dwell();
        self.inner.read(buf)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let _fs = self.tracking.fs.shared();
        let _in = self.handle.shared();
        self.tracking.meet();
        self.tracking.dwell();
        self.inner.read_at(buf, offset)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let _fs = self.tracking.fs.shared();
        let _in = self.handle.exclusive();
        self.tracking.gate.pass(self.inner.name());
        self.tracking.dwell();
        self.inner.write(buf)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let _fs = self.tracking.fs.shared();
        let _in = self.handle.exclusive();
        self.tracking.dwell();
        self.inner.write_at(buf, offset)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let _fs = self.tracking.fs.shared();
        let _in = self.handle.exclusive();
        self.inner.seek(pos)
    }

    fn stat(&self) -> Result<Metadata> {
        let _fs = self.tracking.fs.shared();
        let _in = self.handle.shared();
        self.tracking.dwell();
        self.inner.stat()
    }

    fn sync(&mut self) -> Result<()> {
        let _fs = self.tracking.fs.shared();
        let _in = self.handle.exclusive();
        self.inner.sync()
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        let _fs = self.tracking.fs.shared();
        let _in = self.handle.exclusive();
        self.tracking.dwell();
        self.inner.truncate(size)
    }

    fn readdir(&mut self, n: Option<usize>) -> Result<Vec<Metadata>> {
        let _fs = self.tracking.fs.shared();
        let _in = self.handle.exclusive();
        self.inner.readdir(n)
    }

    fn readdir_names(&mut self, n: Option<usize>) -> Result<Vec<String>> {
        let _fs = self.tracking.fs.shared();
        let _in = self.handle.exclusive();
        self.inner.readdir_names(n)
    }

    fn read_dir(&mut self, n: Option<usize>) -> Result<Vec<DirEntry>> {
        let _fs = self.tracking.fs.shared();
        let _in = self.handle.exclusive();
        self.inner.read_dir(n)
    }

    // Close runs without the parent lock, so it only touches the handle tracker.
    fn close(&mut self) -> Result<()> {
        let _in = self.handle.exclusive();
        self.inner.close()
    }
}
