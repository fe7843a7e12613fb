//! Process-scoped runtime context.
//!
//! [`RuntimeContext`] owns every table an [`ExternalReference`] can be derived
//! from: runtime functions, builtins and C functions by id, the per-runtime
//! data block whose fields generated code reads and writes in place, the call
//! redirector, and a handle to the shared [`ExternalConstants`].
//!
//! [`ExternalReference`]: crate::ExternalReference

use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::constants::{DoubleConstant, ExternalConstants};
use crate::error::{ExternalReferenceError, Result};
use crate::redirect::{CallType, NoRedirect, Redirector};

/// Runtime function identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeFunctionId(pub u32);

/// Builtin identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuiltinId(pub u32);

/// C function identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CFunctionId(pub u32);

/// A runtime function generated code can call through the C entry stub.
#[derive(Debug, Clone)]
pub struct RuntimeFunction {
    /// Function id
    pub id: RuntimeFunctionId,
    /// Function name
    pub name: &'static str,
    /// Native entry point
    pub entry: usize,
    /// Number of arguments, -1 for variadic
    pub nargs: i32,
}

/// A builtin code object entry.
#[derive(Debug, Clone)]
pub struct Builtin {
    /// Builtin id
    pub id: BuiltinId,
    /// Builtin name
    pub name: &'static str,
    /// Address of the builtin's code
    pub address: usize,
}

/// A C-callable helper.
#[derive(Debug, Clone)]
pub struct CFunction {
    /// Function id
    pub id: CFunctionId,
    /// Function name
    pub name: &'static str,
    /// Native entry point
    pub address: usize,
}

macro_rules! indexed_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $( $(#[$vmeta:meta])* $variant:ident ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name { $( $(#[$vmeta])* $variant ),+ }

        impl $name {
            /// All variants, in index order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Number of variants.
            pub const COUNT: usize = Self::ALL.len();

            /// Variant name
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }
    };
}

indexed_enum! {
    /// Runtime field generated code reads or writes directly.
    pub enum RuntimeField {
        /// JS stack limit (may be lowered to request an interrupt)
        StackLimit,
        /// Real JS stack limit
        RealStackLimit,
        /// RegExp backtracking stack limit
        RegexpStackLimit,
        /// Start of new space
        NewSpaceStart,
        /// Mask identifying new space addresses
        NewSpaceMask,
        /// New space allocation top
        NewSpaceAllocationTop,
        /// New space allocation limit
        NewSpaceAllocationLimit,
        /// Old space allocation top
        OldSpaceAllocationTop,
        /// Old space allocation limit
        OldSpaceAllocationLimit,
        /// Store buffer top
        StoreBufferTop,
        /// Handle scope next slot
        HandleScopeNext,
        /// Handle scope limit
        HandleScopeLimit,
        /// Handle scope nesting level
        HandleScopeLevel,
        /// Exception scheduled to be thrown on return to JS
        ScheduledException,
        /// Pending message object
        PendingMessageObject,
        /// Non-zero while the CPU profiler runs
        IsProfiling,
        /// Non-zero while a debugger is attached
        DebugIsActive,
        /// Date cache stamp
        DateCacheStamp,
        /// Countdown used by `--stress-deopt`
        StressDeoptCount,
        /// Head of the allocation sites list
        AllocationSitesList,
    }
}

indexed_enum! {
    /// Slot of the runtime address table (frame and handler bookkeeping).
    pub enum AddressId {
        /// Topmost try handler
        Handler,
        /// Frame pointer of the last C entry
        CEntryFp,
        /// Currently called C function
        CFunction,
        /// Current context
        Context,
        /// Pending exception
        PendingException,
        /// Context of the handler catching the pending exception
        PendingHandlerContext,
        /// Code of the handler catching the pending exception
        PendingHandlerCode,
        /// Offset of the handler catching the pending exception
        PendingHandlerOffset,
        /// Frame pointer of the handler catching the pending exception
        PendingHandlerFp,
        /// Stack pointer of the handler catching the pending exception
        PendingHandlerSp,
        /// Exception caught by an external try/catch
        ExternalCaughtException,
        /// Stack pointer at JS entry
        JsEntrySp,
    }
}

/// Data block whose fields generated code addresses directly.
///
/// The leading header word gives the block an address of its own, distinct
/// from every field cell.
#[repr(C)]
#[derive(Debug)]
pub struct RuntimeData {
    header: AtomicUsize,
    fields: [AtomicUsize; RuntimeField::COUNT],
    address_table: [AtomicUsize; AddressId::COUNT],
    roots: Box<[AtomicUsize]>,
}

impl RuntimeData {
    fn new(root_count: usize) -> Self {
        Self {
            header: AtomicUsize::new(0),
            fields: std::array::from_fn(|_| AtomicUsize::new(0)),
            address_table: std::array::from_fn(|_| AtomicUsize::new(0)),
            roots: (0..root_count).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Cell of a runtime field.
    pub fn field(&self, field: RuntimeField) -> &AtomicUsize {
        &self.fields[field as usize]
    }

    /// Read a runtime field.
    pub fn load(&self, field: RuntimeField) -> usize {
        self.field(field).load(Ordering::Relaxed)
    }

    /// Write a runtime field.
    pub fn store(&self, field: RuntimeField, value: usize) {
        self.field(field).store(value, Ordering::Relaxed);
    }

    /// Cell of an address table slot.
    pub fn address_slot(&self, id: AddressId) -> &AtomicUsize {
        &self.address_table[id as usize]
    }

    /// The roots array.
    pub fn roots(&self) -> &[AtomicUsize] {
        &self.roots
    }
}

/// Builder for [`RuntimeContext`].
#[derive(Default)]
pub struct RuntimeContextBuilder {
    runtime_functions: Vec<RuntimeFunction>,
    builtins: Vec<Builtin>,
    c_functions: Vec<CFunction>,
    redirector: Option<Box<dyn Redirector>>,
    constants: Option<Arc<ExternalConstants>>,
    root_count: usize,
}

impl RuntimeContextBuilder {
    /// Register a runtime function.
    pub fn runtime_function(
        mut self,
        id: RuntimeFunctionId,
        name: &'static str,
        entry: usize,
        nargs: i32,
    ) -> Self {
        self.runtime_functions.push(RuntimeFunction {
            id,
            name,
            entry,
            nargs,
        });
        self
    }

    /// Register a builtin.
    pub fn builtin(mut self, id: BuiltinId, name: &'static str, address: usize) -> Self {
        self.builtins.push(Builtin { id, name, address });
        self
    }

    /// Register a C function.
    pub fn c_function(mut self, id: CFunctionId, name: &'static str, address: usize) -> Self {
        self.c_functions.push(CFunction { id, name, address });
        self
    }

    /// Use a redirector other than the identity.
    pub fn redirector(mut self, redirector: impl Redirector + 'static) -> Self {
        self.redirector = Some(Box::new(redirector));
        self
    }

    /// Share an existing constants registry.
    pub fn constants(mut self, constants: Arc<ExternalConstants>) -> Self {
        self.constants = Some(constants);
        self
    }

    /// Size of the roots array.
    pub fn roots(mut self, count: usize) -> Self {
        self.root_count = count;
        self
    }

    /// Build the context. Later registrations of a duplicate id win.
    pub fn build(self) -> RuntimeContext {
        let runtime_index = self
            .runtime_functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id, i))
            .collect();
        let builtin_index = self
            .builtins
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id, i))
            .collect();
        let builtin_names = self
            .builtins
            .iter()
            .enumerate()
            .map(|(i, b)| (b.name, i))
            .collect();
        let c_function_index = self
            .c_functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id, i))
            .collect();

        RuntimeContext {
            data: Box::new(RuntimeData::new(self.root_count)),
            runtime_functions: self.runtime_functions,
            runtime_index,
            builtins: self.builtins,
            builtin_index,
            builtin_names,
            c_functions: self.c_functions,
            c_function_index,
            redirector: self.redirector.unwrap_or_else(|| Box::new(NoRedirect)),
            constants: self
                .constants
                .unwrap_or_else(|| Arc::new(ExternalConstants::set_up())),
        }
    }
}

/// Process-scoped tables external references are resolved against.
pub struct RuntimeContext {
    data: Box<RuntimeData>,
    runtime_functions: Vec<RuntimeFunction>,
    runtime_index: FxHashMap<RuntimeFunctionId, usize>,
    builtins: Vec<Builtin>,
    builtin_index: FxHashMap<BuiltinId, usize>,
    builtin_names: FxHashMap<&'static str, usize>,
    c_functions: Vec<CFunction>,
    c_function_index: FxHashMap<CFunctionId, usize>,
    redirector: Box<dyn Redirector>,
    constants: Arc<ExternalConstants>,
}

impl RuntimeContext {
    /// Start building a context.
    pub fn builder() -> RuntimeContextBuilder {
        RuntimeContextBuilder::default()
    }

    /// The runtime data block.
    pub fn data(&self) -> &RuntimeData {
        &self.data
    }

    /// Address of the runtime data block itself.
    pub fn data_address(&self) -> usize {
        &self.data.header as *const AtomicUsize as usize
    }

    /// The shared constants registry.
    pub fn constants(&self) -> &Arc<ExternalConstants> {
        &self.constants
    }

    /// Redirect a host function address.
    pub fn redirect(&self, address: usize, call_type: CallType) -> usize {
        self.redirector.redirect(address, call_type)
    }

    /// Look up a runtime function by id.
    pub fn runtime_function(&self, id: RuntimeFunctionId) -> Result<&RuntimeFunction> {
        self.runtime_index
            .get(&id)
            .map(|&i| &self.runtime_functions[i])
            .ok_or(ExternalReferenceError::UnknownRuntimeFunction(id.0))
    }

    /// Look up a builtin by id.
    pub fn builtin(&self, id: BuiltinId) -> Result<&Builtin> {
        self.builtin_index
            .get(&id)
            .map(|&i| &self.builtins[i])
            .ok_or(ExternalReferenceError::UnknownBuiltin(id.0))
    }

    /// Look up a builtin by name.
    pub fn builtin_by_name(&self, name: &str) -> Result<&Builtin> {
        self.builtin_names
            .get(name)
            .map(|&i| &self.builtins[i])
            .ok_or_else(|| ExternalReferenceError::UnknownBuiltinName(name.to_string()))
    }

    /// Look up a C function by id.
    pub fn c_function(&self, id: CFunctionId) -> Result<&CFunction> {
        self.c_function_index
            .get(&id)
            .map(|&i| &self.c_functions[i])
            .ok_or(ExternalReferenceError::UnknownCFunction(id.0))
    }

    /// Runtime function whose entry (direct or redirected) is `address`.
    pub fn runtime_function_for_entry(&self, address: usize) -> Option<&RuntimeFunction> {
        let target = self
            .redirector
            .resolve(address)
            .map_or(address, |(original, _)| original);
        self.runtime_functions.iter().rev().find(|f| f.entry == target)
    }

    /// Best-effort name of an address this context knows about.
    pub fn name_of_address(&self, address: usize) -> Option<String> {
        if let Some(f) = self.runtime_function_for_entry(address) {
            return Some(format!("Runtime::{}", f.name));
        }
        let target = self
            .redirector
            .resolve(address)
            .map_or(address, |(original, _)| original);
        if let Some(b) = self.builtins.iter().rev().find(|b| b.address == target) {
            return Some(format!("Builtin::{}", b.name));
        }
        if let Some(f) = self.c_functions.iter().rev().find(|f| f.address == target) {
            return Some(f.name.to_string());
        }
        if address == self.data_address() {
            return Some("runtime_data".to_string());
        }
        if let Some(field) = RuntimeField::ALL
            .iter()
            .find(|&&f| self.data.field(f) as *const AtomicUsize as usize == address)
        {
            return Some(format!("RuntimeField::{}", field.name()));
        }
        if let Some(id) = AddressId::ALL
            .iter()
            .find(|&&id| self.data.address_slot(id) as *const AtomicUsize as usize == address)
        {
            return Some(format!("AddressId::{}", id.name()));
        }
        if self.data.roots().first().map(|r| r as *const AtomicUsize as usize) == Some(address) {
            return Some("roots_array_start".to_string());
        }
        for &(which, name) in DOUBLE_CONSTANT_NAMES {
            if self.constants.double_address(which) == address {
                return Some(name.to_string());
            }
        }
        None
    }
}

const DOUBLE_CONSTANT_NAMES: &[(DoubleConstant, &str)] = &[
    (DoubleConstant::MinInt, "LDoubleConstant::min_int"),
    (DoubleConstant::OneHalf, "LDoubleConstant::one_half"),
    (DoubleConstant::MinusOneHalf, "LDoubleConstant::minus_one_half"),
    (DoubleConstant::NegativeInfinity, "LDoubleConstant::negative_infinity"),
    (DoubleConstant::TheHoleNan, "LDoubleConstant::the_hole_nan"),
    (DoubleConstant::Uint32Bias, "LDoubleConstant::uint32_bias"),
];

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("runtime_functions", &self.runtime_functions.len())
            .field("builtins", &self.builtins.len())
            .field("c_functions", &self.c_functions.len())
            .field("constants", &self.constants)
            .finish()
    }
}
