//! Line-atomic output capture
//!
//! Every case gets its own capture scopes. Writers buffer text privately
//! until a line terminator arrives, then append whole lines to their scope
//! (and every open enclosing scope) under a single lock acquisition, so a
//! captured line never mixes fragments from two writers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct Scope {
    id: u64,
    captured: Mutex<String>,
    parent: Option<Arc<Scope>>,
    closed: AtomicBool,
}

impl Scope {
    fn append(&self, lines: &str) {
        if !self.closed.load(Ordering::Acquire) {
            lock(&self.captured).push_str(lines);
        }
    }
}

/// Writer bound to one capture scope.
///
/// Clones share the same pending-line buffer; use [`ScopeHandle::writer`] to
/// get an independent writer for another thread or task.
#[derive(Clone, Debug)]
pub struct ScopeHandle {
    scope: Arc<Scope>,
    pending: Arc<Mutex<String>>,
}

impl ScopeHandle {
    fn new(scope: Arc<Scope>) -> Self {
        Self {
            scope,
            pending: Arc::new(Mutex::new(String::new())),
        }
    }

    pub fn id(&self) -> u64 {
        self.scope.id
    }

    /// Independent writer into the same scope
    pub fn writer(&self) -> ScopeHandle {
        ScopeHandle::new(self.scope.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.scope.closed.load(Ordering::Acquire)
    }

    /// Buffer `text`, publishing every completed line
    pub fn write(&self, text: &str) {
        let complete = {
            let mut pending = lock(&self.pending);
            pending.push_str(text);
            match pending.rfind('\n') {
                Some(end) => {
                    let rest = pending.split_off(end + 1);
                    std::mem::replace(&mut *pending, rest)
                }
                None => return,
            }
        };
        self.publish(&complete);
    }

    pub fn write_line(&self, line: &str) {
        let mut text = String::with_capacity(line.len() + 1);
        text.push_str(line);
        text.push('\n');
        self.write(&text);
    }

    /// Publish a trailing partial line, terminating it
    pub fn flush(&self) {
        let rest = std::mem::take(&mut *lock(&self.pending));
        if !rest.is_empty() {
            self.publish(&format!("{rest}\n"));
        }
    }

    /// Text captured so far
    pub fn snapshot(&self) -> String {
        lock(&self.scope.captured).clone()
    }

    fn publish(&self, lines: &str) {
        let mut scope = Some(&self.scope);
        while let Some(current) = scope {
            current.append(lines);
            scope = current.parent.as_ref();
        }
    }
}

impl fmt::Write for ScopeHandle {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        ScopeHandle::write(self, s);
        Ok(())
    }
}

/// Opens and closes capture scopes
#[derive(Debug, Default)]
pub struct OutputMultiplexer {
    next_id: AtomicU64,
    open: AtomicUsize,
}

impl OutputMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_scope(&self) -> ScopeHandle {
        self.open_inner(None)
    }

    /// Scope whose lines are also recorded by `parent` while it is open
    pub fn open_nested(&self, parent: &ScopeHandle) -> ScopeHandle {
        self.open_inner(Some(parent.scope.clone()))
    }

    fn open_inner(&self, parent: Option<Arc<Scope>>) -> ScopeHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.open.fetch_add(1, Ordering::AcqRel);
        ScopeHandle::new(Arc::new(Scope {
            id,
            captured: Mutex::new(String::new()),
            parent,
            closed: AtomicBool::new(false),
        }))
    }

    pub fn write(&self, handle: &ScopeHandle, text: &str) {
        handle.write(text);
    }

    /// Close the scope and return everything it recorded.
    ///
    /// Lines already published to enclosing scopes stay there. Closing an
    /// already-closed scope returns its text again.
    pub fn close_scope(&self, handle: &ScopeHandle) -> String {
        handle.flush();
        if !handle.scope.closed.swap(true, Ordering::AcqRel) {
            self.open.fetch_sub(1, Ordering::AcqRel);
        }
        handle.snapshot()
    }

    pub fn open_scopes(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }
}
