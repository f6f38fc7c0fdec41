//! Top-level adapter engine: placement, program building, caching, and thunk installation.

use std::sync::Arc;

use sharecall_abi::{CallInfo, Classifier, PlacementCache, PlacementError, Signature};

use crate::adapter::compiler::{build_adapter, BuildError};
use crate::adapter::program::{AdapterProgram, Direction, VerifyError};
use crate::config::{ConfigError, EngineConfig};
use crate::runtime::cache::{AdapterKey, Insert, ProgramCache, ProgramEntry};
use crate::runtime::thunk::{InvokerError, NativeInvoker, TransitionThunk};

/// Error producing a program or thunk
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A signature could not be placed on the configured target
    #[error("Placement failed: {0}")]
    Placement(#[from] PlacementError),
    /// The placements could not be bridged
    #[error("Adapter build failed: {0}")]
    Build(#[from] BuildError),
    /// A built program failed verification
    #[error("Adapter verification failed: {0}")]
    Verify(#[from] VerifyError),
    /// The program cache holds its configured maximum
    #[error("Program cache is full ({0} entries)")]
    CacheFull(usize),
    /// Bad engine configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The invoker cannot make the program's call
    #[error("Thunk installation failed: {0}")]
    Invoker(#[from] InvokerError),
}

/// Owner of the placement cache, program cache, and native invoker
pub struct AdapterEngine {
    config: EngineConfig,
    placements: PlacementCache<Classifier>,
    programs: ProgramCache,
    invoker: Arc<dyn NativeInvoker>,
}

impl AdapterEngine {
    /// Create an engine with default configuration
    pub fn new(invoker: Arc<dyn NativeInvoker>) -> Self {
        Self::with_config(EngineConfig::default(), invoker)
    }

    /// Create an engine with custom configuration
    pub fn with_config(config: EngineConfig, invoker: Arc<dyn NativeInvoker>) -> Self {
        let placements = PlacementCache::new(Classifier::new(config.target.clone()));
        let programs = ProgramCache::new(config.max_programs);
        tracing::debug!(
            target_name = %config.target.name,
            verify = config.verify_programs,
            max_programs = config.max_programs,
            invoker = invoker.name(),
            "adapter engine created"
        );
        AdapterEngine { config, placements, programs, invoker }
    }

    /// Create an engine configured from the environment
    pub fn from_env(invoker: Arc<dyn NativeInvoker>) -> Result<Self, EngineError> {
        Ok(Self::with_config(EngineConfig::from_env()?, invoker))
    }

    /// Caller and callee placements of `signature` for `direction`
    pub fn call_infos(
        &self,
        signature: &Signature,
        direction: Direction,
    ) -> Result<(Arc<CallInfo>, Arc<CallInfo>), EngineError> {
        let caller = self.placements.get(signature, direction.caller_convention())?;
        let callee = self.placements.get(signature, direction.callee_convention())?;
        Ok((caller, callee))
    }

    /// Classify, build, and (if configured) verify the program for `key`
    /// without consulting or filling the program cache
    pub fn build(&self, key: &AdapterKey) -> Result<AdapterProgram, EngineError> {
        let (caller, callee) = self.call_infos(&key.signature, key.direction).inspect_err(|e| {
            tracing::warn!(direction = %key.direction, error = %e, "signature placement failed");
        })?;

        let program = build_adapter(&caller, &callee, key.direction, key.target).inspect_err(|e| {
            tracing::warn!(direction = %key.direction, error = %e, "adapter build failed");
        })?;

        if self.config.verify_programs {
            program.verify(&callee).inspect_err(|e| {
                tracing::warn!(direction = %key.direction, error = %e, "adapter verification failed");
            })?;
        }

        tracing::debug!(
            direction = %key.direction,
            moves = program.moves.len(),
            callee_stack = program.callee_stack_usage,
            "built adapter program"
        );
        Ok(program)
    }

    /// Published program for `key`, building it on first request
    pub fn program(&self, key: &AdapterKey) -> Result<Arc<ProgramEntry>, EngineError> {
        if let Some(entry) = self.programs.lookup(key) {
            return Ok(entry);
        }

        let program = self.build(key)?;
        match self.programs.insert(key.clone(), program) {
            Insert::Published(entry) => Ok(entry),
            Insert::Adopted(entry) => {
                tracing::debug!(direction = %key.direction, "adopted concurrently published program");
                Ok(entry)
            }
            Insert::Full => {
                tracing::warn!(max_programs = self.config.max_programs, "program cache full");
                Err(EngineError::CacheFull(self.config.max_programs))
            }
        }
    }

    /// Thunk for `key`, installed the first time the boundary is crossed
    pub fn thunk(&self, key: &AdapterKey) -> Result<Arc<TransitionThunk>, EngineError> {
        let entry = self.program(key)?;
        if !entry.has_thunk() {
            self.invoker.prepare(entry.program.callee_stack_usage).inspect_err(|e| {
                tracing::warn!(direction = %key.direction, error = %e, "invoker not ready");
            })?;
        }
        Ok(entry.thunk(&self.invoker))
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Placement cache
    pub fn placements(&self) -> &PlacementCache<Classifier> {
        &self.placements
    }

    /// Program cache
    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::program::CallTarget;
    use crate::runtime::thunk::FrameInvoker;
    use sharecall_abi::{Param, TargetDesc, ValueType};

    fn engine() -> AdapterEngine {
        let config = EngineConfig::default().with_target(TargetDesc::aapcs64());
        AdapterEngine::with_config(config, Arc::new(FrameInvoker))
    }

    fn key() -> AdapterKey {
        AdapterKey {
            signature: Signature::new(Param::variable(ValueType::int(2)), vec![Param::variable(ValueType::int(2))]),
            direction: Direction::SharedToNormal,
            target: CallTarget::Indirect,
        }
    }

    #[test]
    fn test_engine_creation() {
        let engine = engine();
        assert_eq!(engine.config().target.name, "aapcs64");
        assert_eq!(engine.programs().entry_count(), 0);
    }

    #[test]
    fn test_program_is_cached() {
        let engine = engine();
        let a = engine.program(&key()).unwrap();
        let b = engine.program(&key()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(engine.programs().entry_count(), 1);
        // normal and shared placements
        assert_eq!(engine.placements().len(), 2);
    }

    #[test]
    fn test_thunk_is_installed_once() {
        let engine = engine();
        let a = engine.thunk(&key()).unwrap();
        let b = engine.thunk(&key()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.invoker_name(), "frame");
    }

    #[test]
    fn test_placement_error_is_reported() {
        let engine = engine();
        let bad = AdapterKey {
            signature: Signature::new(Param::concrete(ValueType::Void), vec![Param::concrete(ValueType::int(5))]),
            ..key()
        };
        assert!(matches!(engine.program(&bad), Err(EngineError::Placement(_))));
        assert_eq!(engine.programs().entry_count(), 0);
    }

    #[test]
    fn test_cache_full_is_reported() {
        let config = EngineConfig { max_programs: 1, ..EngineConfig::default().with_target(TargetDesc::aapcs64()) };
        let engine = AdapterEngine::with_config(config, Arc::new(FrameInvoker));
        engine.program(&key()).unwrap();
        let other = AdapterKey { direction: Direction::NormalToShared, ..key() };
        assert!(matches!(engine.program(&other), Err(EngineError::CacheFull(1))));
    }

    struct RefusingInvoker;

    impl NativeInvoker for RefusingInvoker {
        fn name(&self) -> &str {
            "refusing"
        }

        fn prepare(&self, stack_bytes: u32) -> Result<(), InvokerError> {
            Err(InvokerError { invoker: self.name().to_string(), stack_bytes, reason: "no backend".to_string() })
        }

        unsafe fn invoke(&self, _target: usize, _frame: &mut crate::LocationSet, _stack_bytes: u32) {
            unreachable!("never prepared")
        }
    }

    #[test]
    fn test_unprepared_invoker_installs_no_thunk() {
        let config = EngineConfig::default().with_target(TargetDesc::aapcs64());
        let engine = AdapterEngine::with_config(config, Arc::new(RefusingInvoker));
        let err = engine.thunk(&key()).unwrap_err();
        assert!(matches!(err, EngineError::Invoker(InvokerError { stack_bytes: 0, .. })));
        let entry = engine.program(&key()).unwrap();
        assert!(!entry.has_thunk());
    }
}
