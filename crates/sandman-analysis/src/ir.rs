//! Host-compiler IR as seen by the policy analysis.
//!
//! The analysis only needs a thin slice of a compiler's IR: functions,
//! their basic blocks, successor edges, call instructions and callee
//! identity. Everything else collapses into [`Instruction::Other`].
//!
//! A [`Function`] with no blocks is a declaration (an external symbol the
//! module calls but does not define).
//!
//! # Example
//!
//! ```rust
//! use sandman_analysis::ir::{BasicBlock, Callee, Function, Instruction, Module, Terminator};
//!
//! let main = Function::new(
//!     "main",
//!     vec![BasicBlock::new(
//!         "entry",
//!         vec![Instruction::call(Callee::function("open"))],
//!         Terminator::Return,
//!     )],
//! );
//! let module = Module::new("demo", vec![main, Function::declaration("open")]);
//!
//! assert!(module.function("main").is_some_and(|f| f.is_definition()));
//! assert!(module.function("open").is_some_and(|f| !f.is_definition()));
//! ```

use serde::{Deserialize, Serialize};

/// Prefix carried by compiler intrinsic base names.
pub const INTRINSIC_PREFIX: &str = "llvm.";

/// A compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Module (source file) name.
    pub name: String,
    /// Functions defined or declared by the module.
    pub functions: Vec<Function>,
}

impl Module {
    /// Creates a module from its functions.
    pub fn new(name: impl Into<String>, functions: Vec<Function>) -> Self {
        Self {
            name: name.into(),
            functions,
        }
    }

    /// Looks up a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Returns true if the module has a body for `name`.
    pub fn defines(&self, name: &str) -> bool {
        self.function(name).is_some_and(Function::is_definition)
    }

    /// Iterates over functions that have a body.
    pub fn definitions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter().filter(|f| f.is_definition())
    }

    /// Total number of call instructions across all definitions.
    pub fn call_count(&self) -> usize {
        self.definitions()
            .flat_map(|f| f.blocks.iter())
            .flat_map(|b| b.instructions.iter())
            .filter(|i| i.as_call().is_some())
            .count()
    }
}

/// A function definition or declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Symbol name.
    pub name: String,
    /// Basic blocks; the first one is the entry block.
    #[serde(default)]
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    /// Creates a function with a body.
    pub fn new(name: impl Into<String>, blocks: Vec<BasicBlock>) -> Self {
        Self {
            name: name.into(),
            blocks,
        }
    }

    /// Creates a body-less declaration.
    pub fn declaration(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Returns true if the function has a body.
    pub fn is_definition(&self) -> bool {
        !self.blocks.is_empty()
    }

    /// The entry block, if the function is defined.
    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    /// Looks up a block by name.
    pub fn block(&self, name: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub(crate) fn block_mut(&mut self, name: &str) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.name == name)
    }
}

/// A straight-line sequence of instructions ending in a terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Block label, unique within its function.
    pub name: String,
    /// Non-terminator instructions in program order.
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    /// How control leaves the block.
    pub terminator: Terminator,
}

impl BasicBlock {
    /// Creates a block.
    pub fn new(
        name: impl Into<String>,
        instructions: Vec<Instruction>,
        terminator: Terminator,
    ) -> Self {
        Self {
            name: name.into(),
            instructions,
            terminator,
        }
    }

    /// Successor block names.
    pub fn successors(&self) -> &[String] {
        self.terminator.successors()
    }
}

/// Block terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Terminator {
    /// Function return.
    Return,
    /// Control never reaches past this point (e.g. after `exit`).
    Unreachable,
    /// Conditional or unconditional branch.
    Branch {
        /// Target block names.
        targets: Vec<String>,
    },
}

impl Terminator {
    /// Branch to a single block.
    pub fn jump(target: impl Into<String>) -> Self {
        Self::Branch {
            targets: vec![target.into()],
        }
    }

    /// Two-way conditional branch.
    pub fn cond(then: impl Into<String>, otherwise: impl Into<String>) -> Self {
        Self::Branch {
            targets: vec![then.into(), otherwise.into()],
        }
    }

    /// Successor block names.
    pub fn successors(&self) -> &[String] {
        match self {
            Self::Return | Self::Unreachable => &[],
            Self::Branch { targets } => targets,
        }
    }
}

/// An IR instruction, reduced to what the analysis distinguishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    /// A direct call.
    Call {
        /// Called symbol.
        callee: Callee,
        /// Call arguments.
        #[serde(default)]
        args: Vec<Operand>,
    },
    /// Anything that is not a call.
    Other {
        /// Mnemonic, kept for diagnostics only.
        opcode: String,
    },
}

impl Instruction {
    /// A call without arguments.
    pub fn call(callee: Callee) -> Self {
        Self::Call {
            callee,
            args: Vec::new(),
        }
    }

    /// A call with arguments.
    pub fn call_with(callee: Callee, args: Vec<Operand>) -> Self {
        Self::Call { callee, args }
    }

    /// A non-call instruction.
    pub fn other(opcode: impl Into<String>) -> Self {
        Self::Other {
            opcode: opcode.into(),
        }
    }

    /// The callee, if this is a call.
    pub fn as_call(&self) -> Option<&Callee> {
        match self {
            Self::Call { callee, .. } => Some(callee),
            Self::Other { .. } => None,
        }
    }
}

/// Identity of a called symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Callee {
    /// An ordinary function symbol.
    Function {
        /// Symbol name.
        name: String,
    },
    /// A compiler intrinsic, identified by its base name (`llvm.memset`).
    Intrinsic {
        /// Intrinsic base name without overload suffixes.
        base_name: String,
    },
}

impl Callee {
    /// An ordinary function callee.
    pub fn function(name: impl Into<String>) -> Self {
        Self::Function { name: name.into() }
    }

    /// An intrinsic callee.
    pub fn intrinsic(base_name: impl Into<String>) -> Self {
        Self::Intrinsic {
            base_name: base_name.into(),
        }
    }

    /// Returns true for intrinsics.
    pub fn is_intrinsic(&self) -> bool {
        matches!(self, Self::Intrinsic { .. })
    }

    /// The name used for symbol lookup.
    ///
    /// Intrinsics resolve to their base name with the `llvm.` prefix
    /// dropped, so `llvm.memset` resolves to `memset`.
    pub fn resolved_name(&self) -> &str {
        match self {
            Self::Function { name } => name,
            Self::Intrinsic { base_name } => base_name
                .strip_prefix(INTRINSIC_PREFIX)
                .unwrap_or(base_name),
        }
    }
}

/// A call argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// Integer constant.
    Const(i64),
    /// Named SSA value.
    Value(String),
}

/// Address of a call instruction inside a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallSite {
    /// Enclosing function.
    pub function: String,
    /// Enclosing block.
    pub block: String,
    /// Instruction index within the block.
    pub index: usize,
}

impl CallSite {
    /// Creates a call-site address.
    pub fn new(function: impl Into<String>, block: impl Into<String>, index: usize) -> Self {
        Self {
            function: function.into(),
            block: block.into(),
            index,
        }
    }
}

impl std::fmt::Display for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}#{}", self.function, self.block, self.index)
    }
}
