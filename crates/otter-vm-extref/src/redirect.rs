//! Call redirection.
//!
//! Generated code never calls a host function directly: every C-callable
//! address passes through a [`Redirector`] first. On native targets this is
//! the identity. When generated code runs on a simulator, or needs a
//! calling-convention adapter, the redirector hands out the address of a
//! trampoline record instead and remembers what it stands for.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Calling convention of a redirected host function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    /// Builtin call: `(args...) -> object`
    BuiltinCall,
    /// Builtin comparing two doubles: `(f64, f64) -> i32`
    BuiltinCompareCall,
    /// `(f64, f64) -> f64`
    BuiltinFpFpCall,
    /// `(f64) -> f64`
    BuiltinFpCall,
    /// `(f64, i32) -> f64`
    BuiltinFpIntCall,
    /// Direct API callback: `(info) -> ()`
    DirectApiCall,
    /// Profiling API callback, passes the real callback as extra argument
    ProfilingApiCall,
    /// Direct accessor getter: `(name, info) -> ()`
    DirectGetterCall,
    /// Profiling accessor getter, passes the real getter as extra argument
    ProfilingGetterCall,
}

/// Maps a host function address to the address generated code should call.
pub trait Redirector: Send + Sync {
    /// Redirect `address`, called with the given convention.
    fn redirect(&self, address: usize, call_type: CallType) -> usize;

    /// Resolve a redirected address back to the original function, if it is
    /// one this redirector handed out.
    fn resolve(&self, _redirected: usize) -> Option<(usize, CallType)> {
        None
    }
}

/// Identity redirection for code that runs natively.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRedirect;

impl Redirector for NoRedirect {
    #[inline]
    fn redirect(&self, address: usize, _call_type: CallType) -> usize {
        address
    }
}

/// One trampoline record. Its address is what generated code calls.
#[derive(Debug)]
#[repr(C)]
pub struct Redirection {
    /// The host function being called
    pub external_function: usize,
    /// Its calling convention
    pub call_type: CallType,
}

/// Hands out one stable trampoline per `(address, call type)` pair.
///
/// The same pair always redirects to the same trampoline, so equal host
/// functions keep producing equal external references.
#[derive(Debug, Default)]
pub struct TrampolineRedirector {
    redirections: Mutex<FxHashMap<(usize, CallType), Box<Redirection>>>,
}

impl TrampolineRedirector {
    /// Create an empty redirector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trampolines allocated so far.
    pub fn len(&self) -> usize {
        self.redirections.lock().len()
    }

    /// Whether no trampoline has been allocated yet.
    pub fn is_empty(&self) -> bool {
        self.redirections.lock().is_empty()
    }
}

impl Redirector for TrampolineRedirector {
    fn redirect(&self, address: usize, call_type: CallType) -> usize {
        let mut redirections = self.redirections.lock();
        let entry = redirections.entry((address, call_type)).or_insert_with(|| {
            tracing::debug!(
                target: "otter::extref",
                function = address,
                ?call_type,
                "allocated call trampoline"
            );
            Box::new(Redirection {
                external_function: address,
                call_type,
            })
        });
        entry.as_ref() as *const Redirection as usize
    }

    fn resolve(&self, redirected: usize) -> Option<(usize, CallType)> {
        self.redirections
            .lock()
            .values()
            .find(|r| r.as_ref() as *const Redirection as usize == redirected)
            .map(|r| (r.external_function, r.call_type))
    }
}
