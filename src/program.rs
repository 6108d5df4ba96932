//! TOML program descriptions
//!
//! A program is a list of methods with structured bodies. It provides the
//! parser and the method-resolution oracle for the compile queue:
//!
//! ```toml
//! [[method]]
//! name = "main"
//! entry = true
//! body = [
//!     { op = "const", name = "x", value = 20 },
//!     { op = "call", target = "inc", args = ["x"], name = "y" },
//!     { op = "return", value = "y" },
//! ]
//!
//! [[method]]
//! name = "inc"
//! params = 1
//! body = [
//!     { op = "const", name = "one", value = 1 },
//!     { op = "arith", kind = "add", lhs = "p0", rhs = "one", name = "r" },
//!     { op = "return", value = "r" },
//! ]
//! ```
//!
//! Parameters are bound to `p0`, `p1`, .. and the exception inside a call
//! handler to `exception`. A method marked `overrides = "base"` is an
//! implementation of `base` for virtual calls.

use crate::ir::{ArithOp, CallTarget, CmpOp, Edge, Graph, GraphBuilder, NodeId};
use crate::queue::{MethodResolver, ParseError, Parser};
use crate::universe::{MethodFlags, MethodUnit, UnitId, Universe};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub enum ProgramError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml(toml::de::Error),
    DuplicateMethod(String),
    UnknownMethod { method: String, referenced: String },
    OverrideCycle(String),
    /// A body cannot be lowered to a graph
    Body { method: String, reason: String },
}

impl std::fmt::Display for ProgramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Cannot read program {}: {}", path.display(), source)
            }
            Self::Toml(e) => write!(f, "Invalid program TOML: {}", e),
            Self::DuplicateMethod(name) => write!(f, "Method {} is declared twice", name),
            Self::UnknownMethod { method, referenced } => {
                write!(f, "Method {} references unknown method {}", method, referenced)
            }
            Self::OverrideCycle(name) => write!(f, "Override chain of {} is cyclic", name),
            Self::Body { method, reason } => write!(f, "In body of {}: {}", method, reason),
        }
    }
}

impl std::error::Error for ProgramError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Toml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for ProgramError {
    fn from(e: toml::de::Error) -> Self {
        ProgramError::Toml(e)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodDecl {
    pub name: String,
    #[serde(default)]
    pub params: u16,
    #[serde(default)]
    pub entry: bool,
    #[serde(default)]
    pub always_inline: bool,
    #[serde(default)]
    pub never_inline: bool,
    /// Register a deoptimization-target variant
    #[serde(default)]
    pub deopt_target: bool,
    /// The resolution oracle reports this method unreachable
    #[serde(default)]
    pub unreachable: bool,
    /// Only reachable through overriding implementations
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub overrides: Option<String>,
    #[serde(default)]
    pub body: Vec<Op>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Const {
        name: String,
        value: i64,
    },
    Arith {
        name: String,
        kind: ArithOp,
        lhs: String,
        rhs: String,
    },
    Compare {
        name: String,
        kind: CmpOp,
        lhs: String,
        rhs: String,
    },
    Load {
        name: String,
        address: String,
    },
    Store {
        address: String,
        value: String,
    },
    Call {
        target: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        virtual_call: bool,
        /// Ops run when the callee throws; must end in `return` or `throw`
        #[serde(default)]
        handler: Option<Vec<Op>>,
    },
    If {
        cond: String,
        #[serde(default)]
        then: Vec<Op>,
        #[serde(default, rename = "else")]
        otherwise: Vec<Op>,
        /// Bind the joined arm values to this name
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        then_value: Option<String>,
        #[serde(default)]
        else_value: Option<String>,
    },
    Return {
        #[serde(default)]
        value: Option<String>,
    },
    Throw {
        exception: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Program {
    #[serde(default, rename = "method")]
    pub methods: Vec<MethodDecl>,
}

impl Program {
    pub fn parse(content: &str) -> Result<Self, ProgramError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ProgramError> {
        let content = std::fs::read_to_string(path).map_err(|source| ProgramError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Register every method in a fresh universe. Deopt-target variants are
    /// added after all originals.
    pub fn build(self) -> Result<(Universe, ProgramParser), ProgramError> {
        let mut universe = Universe::new();
        for decl in &self.methods {
            let flags = MethodFlags {
                entry_point: decl.entry,
                always_inline: decl.always_inline,
                never_inline: decl.never_inline,
            };
            universe
                .add_method(decl.name.clone(), decl.params, flags)
                .ok_or_else(|| ProgramError::DuplicateMethod(decl.name.clone()))?;
        }

        let mut overriders: HashMap<UnitId, Vec<UnitId>> = HashMap::new();
        for (index, decl) in self.methods.iter().enumerate() {
            let Some(base) = &decl.overrides else { continue };
            let base_id = universe
                .lookup(base)
                .ok_or_else(|| ProgramError::UnknownMethod {
                    method: decl.name.clone(),
                    referenced: base.clone(),
                })?;
            overriders.entry(base_id).or_default().push(UnitId::new(index));
        }
        for decl in &self.methods {
            let mut current = decl.overrides.as_deref();
            let mut steps = 0;
            while let Some(name) = current {
                steps += 1;
                if steps > self.methods.len() {
                    return Err(ProgramError::OverrideCycle(decl.name.clone()));
                }
                current = universe
                    .lookup(name)
                    .and_then(|id| self.methods.get(id.index()))
                    .and_then(|d| d.overrides.as_deref());
            }
        }

        for (index, decl) in self.methods.iter().enumerate() {
            if decl.deopt_target {
                universe.add_deopt_target(UnitId::new(index));
            }
        }

        let parser = ProgramParser {
            decls: Arc::new(self.methods),
            overriders: Arc::new(overriders),
        };
        Ok((universe, parser))
    }
}

/// Parser and resolution oracle over a [`Program`].
#[derive(Debug, Clone)]
pub struct ProgramParser {
    decls: Arc<Vec<MethodDecl>>,
    overriders: Arc<HashMap<UnitId, Vec<UnitId>>>,
}

impl ProgramParser {
    fn decl(&self, unit: &MethodUnit) -> Option<&MethodDecl> {
        let id = unit.original().unwrap_or(unit.id());
        self.decls.get(id.index())
    }
}

impl Parser for ProgramParser {
    fn parse(&self, universe: &Universe, unit: &MethodUnit) -> Result<Graph, ParseError> {
        let decl = self
            .decl(unit)
            .ok_or_else(|| ParseError::new(unit.qualified_name(), "no declaration"))?;
        Lowering::new(universe, decl)
            .lower()
            .map_err(|e| ParseError::new(unit.qualified_name(), e.to_string()))
    }
}

impl MethodResolver for ProgramParser {
    fn implementations(&self, method: UnitId) -> Vec<UnitId> {
        let mut found = Vec::new();
        let mut stack = vec![method];
        while let Some(id) = stack.pop() {
            if self.decls.get(id.index()).is_some_and(|d| !d.is_abstract) {
                found.push(id);
            }
            if let Some(children) = self.overriders.get(&id) {
                stack.extend(children.iter().copied());
            }
        }
        found.sort();
        found.dedup();
        found
    }

    fn is_reachable(&self, method: UnitId) -> bool {
        self.decls.get(method.index()).is_some_and(|d| !d.unreachable)
    }
}

type Env = HashMap<String, NodeId>;

/// Lowers one method body into a graph.
struct Lowering<'a> {
    universe: &'a Universe,
    decl: &'a MethodDecl,
    builder: GraphBuilder,
}

impl<'a> Lowering<'a> {
    fn new(universe: &'a Universe, decl: &'a MethodDecl) -> Self {
        Self {
            universe,
            decl,
            builder: GraphBuilder::new(decl.params),
        }
    }

    fn fail(&self, reason: impl Into<String>) -> ProgramError {
        ProgramError::Body {
            method: self.decl.name.clone(),
            reason: reason.into(),
        }
    }

    fn lower(mut self) -> Result<Graph, ProgramError> {
        let mut env: Env = self
            .builder
            .params()
            .iter()
            .enumerate()
            .map(|(i, &p)| (format!("p{}", i), p))
            .collect();
        let decl = self.decl;
        self.block(&decl.body, &mut env)?;
        if self.builder.is_open() {
            return Err(self.fail("body does not end in return or throw"));
        }
        let method = decl.name.clone();
        self.builder.finish().map_err(|e| ProgramError::Body {
            method,
            reason: e.to_string(),
        })
    }

    fn value(&self, env: &Env, name: &str) -> Result<NodeId, ProgramError> {
        env.get(name)
            .copied()
            .ok_or_else(|| self.fail(format!("unknown value {}", name)))
    }

    fn block(&mut self, ops: &[Op], env: &mut Env) -> Result<(), ProgramError> {
        for op in ops {
            if !self.builder.is_open() {
                return Err(self.fail("unreachable op after return or throw"));
            }
            self.op(op, env)?;
        }
        Ok(())
    }

    fn op(&mut self, op: &Op, env: &mut Env) -> Result<(), ProgramError> {
        match op {
            Op::Const { name, value } => {
                let id = self.builder.constant(*value);
                env.insert(name.clone(), id);
            }
            Op::Arith { name, kind, lhs, rhs } => {
                let (lhs, rhs) = (self.value(env, lhs)?, self.value(env, rhs)?);
                let id = self.builder.arith(*kind, lhs, rhs);
                env.insert(name.clone(), id);
            }
            Op::Compare { name, kind, lhs, rhs } => {
                let (lhs, rhs) = (self.value(env, lhs)?, self.value(env, rhs)?);
                let id = self.builder.compare(*kind, lhs, rhs);
                env.insert(name.clone(), id);
            }
            Op::Load { name, address } => {
                let address = self.value(env, address)?;
                let id = self.builder.load(address).map_err(|e| self.fail(e.to_string()))?;
                env.insert(name.clone(), id);
            }
            Op::Store { address, value } => {
                let (address, value) = (self.value(env, address)?, self.value(env, value)?);
                self.builder
                    .store(address, value)
                    .map_err(|e| self.fail(e.to_string()))?;
            }
            Op::Call {
                target,
                args,
                name,
                virtual_call,
                handler,
            } => {
                let call = self.call(target, args, *virtual_call, handler.as_deref(), env)?;
                if let Some(name) = name {
                    env.insert(name.clone(), call);
                }
            }
            Op::If {
                cond,
                then,
                otherwise,
                name,
                then_value,
                else_value,
            } => {
                let cond = self.value(env, cond)?;
                let branch = self.builder.if_node(cond).map_err(|e| self.fail(e.to_string()))?;
                let mut open_arms: Vec<(NodeId, Option<NodeId>)> = Vec::new();
                for (index, ops, arm_value) in [(0, then, then_value), (1, otherwise, else_value)] {
                    self.builder.enter(branch, Edge::Branch(index));
                    let mut arm_env = env.clone();
                    self.block(ops, &mut arm_env)?;
                    if !self.builder.is_open() {
                        continue;
                    }
                    let value = match (name, arm_value) {
                        (Some(_), Some(v)) => Some(self.value(&arm_env, v)?),
                        (Some(_), None) => {
                            return Err(self.fail("open if arm without a value"))
                        }
                        (None, _) => None,
                    };
                    let end = self.builder.end().map_err(|e| self.fail(e.to_string()))?;
                    open_arms.push((end, value));
                }
                if open_arms.is_empty() {
                    return Ok(());
                }
                let ends: Vec<NodeId> = open_arms.iter().map(|&(end, _)| end).collect();
                let merge = self.builder.merge(&ends);
                if let Some(name) = name {
                    let values: Vec<NodeId> = open_arms.iter().filter_map(|&(_, v)| v).collect();
                    let joined = match values.as_slice() {
                        [single] => *single,
                        _ => self.builder.phi(merge, &values),
                    };
                    env.insert(name.clone(), joined);
                }
            }
            Op::Return { value } => {
                let value = value.as_deref().map(|v| self.value(env, v)).transpose()?;
                self.builder.ret(value).map_err(|e| self.fail(e.to_string()))?;
            }
            Op::Throw { exception } => {
                let exception = self.value(env, exception)?;
                self.builder
                    .unwind(exception)
                    .map_err(|e| self.fail(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn call(
        &mut self,
        target: &str,
        args: &[String],
        virtual_call: bool,
        handler: Option<&[Op]>,
        env: &Env,
    ) -> Result<NodeId, ProgramError> {
        let callee = self
            .universe
            .lookup(target)
            .ok_or_else(|| ProgramError::UnknownMethod {
                method: self.decl.name.clone(),
                referenced: target.to_string(),
            })?;
        let expected = self.universe.unit(callee).param_count() as usize;
        if args.len() != expected {
            return Err(self.fail(format!(
                "call to {} passes {} arguments, expected {}",
                target,
                args.len(),
                expected
            )));
        }
        let args = args
            .iter()
            .map(|a| self.value(env, a))
            .collect::<Result<Vec<_>, _>>()?;
        let call_target = if virtual_call {
            CallTarget::virtual_call(callee)
        } else {
            CallTarget::direct(callee)
        };

        let Some(handler) = handler else {
            return self
                .builder
                .call(call_target, &args)
                .map_err(|e| self.fail(e.to_string()));
        };
        let (call, exception) = self
            .builder
            .call_with_handler(call_target, &args)
            .map_err(|e| self.fail(e.to_string()))?;
        self.builder.enter(exception, Edge::Next);
        let mut handler_env = env.clone();
        handler_env.insert("exception".to_string(), exception);
        self.block(handler, &mut handler_env)?;
        if self.builder.is_open() {
            return Err(self.fail("exception handler does not end in return or throw"));
        }
        self.builder.enter(call, Edge::Next);
        Ok(call)
    }
}
