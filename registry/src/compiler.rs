//! The registry's view of the query compiler. Out of scope for this
//! crate: the actual parser/planner is a separate collaborator reached
//! through this trait.

use async_trait::async_trait;
use common::err::CResult;

use crate::model::{CompileRequest, QueryUnitGroup};

#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, request: &CompileRequest, user_schema_version: u64) -> CResult<QueryUnitGroup>;
}

/// An in-memory fake for tests: returns a fixed group regardless of
/// input, and counts how many times it was invoked (for asserting
/// single-flight de-duplication).
pub struct FakeCompiler<F>
where
    F: Fn(&CompileRequest) -> CResult<QueryUnitGroup> + Send + Sync,
{
    pub compile_fn: F,
    pub calls: std::sync::atomic::AtomicU32,
}

impl<F> FakeCompiler<F>
where
    F: Fn(&CompileRequest) -> CResult<QueryUnitGroup> + Send + Sync,
{
    pub fn new(compile_fn: F) -> Self {
        FakeCompiler {
            compile_fn,
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> Compiler for FakeCompiler<F>
where
    F: Fn(&CompileRequest) -> CResult<QueryUnitGroup> + Send + Sync,
{
    async fn compile(&self, request: &CompileRequest, _user_schema_version: u64) -> CResult<QueryUnitGroup> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        (self.compile_fn)(request)
    }
}
