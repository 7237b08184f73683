//! Recording test doubles for [`StatusWriter`] and [`BuildRunReader`]
//!
//! Every call is captured with its arguments. Return values can be set for
//! all calls, for the n-th call (0-based), or computed by a stub closure;
//! a stub wins over per-call returns, which win over the blanket return.
//! All recorded state sits behind one mutex and is only handed out as
//! clones.

use super::{
    BuildRunReader, CommitContext, CreateOption, PatchOption, StatusError, StatusPatch,
    StatusWriter, UpdateOption,
};
use crate::crds::{BuildRun, BuildRunStatus};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Stub<C> = Arc<dyn Fn(&C) -> Result<(), StatusError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CreateCall {
    pub ctx: CommitContext,
    pub owner: BuildRun,
    pub status: BuildRunStatus,
    pub options: Vec<CreateOption>,
}

#[derive(Debug, Clone)]
pub struct PatchCall {
    pub ctx: CommitContext,
    pub owner: BuildRun,
    pub patch: StatusPatch,
    pub options: Vec<PatchOption>,
}

#[derive(Debug, Clone)]
pub struct UpdateCall {
    pub ctx: CommitContext,
    pub owner: BuildRun,
    pub options: Vec<UpdateOption>,
}

/// One recorded call, in the order calls were made across operations
#[derive(Debug, Clone)]
pub enum Invocation {
    Create(CreateCall),
    Patch(PatchCall),
    Update(UpdateCall),
}

impl Invocation {
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Patch(_) => "patch",
            Self::Update(_) => "update",
        }
    }
}

struct Recorder<C> {
    calls: Vec<C>,
    stub: Option<Stub<C>>,
    returns: Result<(), StatusError>,
    returns_on_call: HashMap<usize, Result<(), StatusError>>,
}

impl<C> Default for Recorder<C> {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            stub: None,
            returns: Ok(()),
            returns_on_call: HashMap::new(),
        }
    }
}

enum Reply<C> {
    Stub(Stub<C>, C),
    Fixed(Result<(), StatusError>),
}

impl<C: Clone> Recorder<C> {
    fn record(&mut self, call: C) -> Reply<C> {
        let index = self.calls.len();
        self.calls.push(call.clone());

        if let Some(stub) = &self.stub {
            return Reply::Stub(Arc::clone(stub), call);
        }
        Reply::Fixed(
            self.returns_on_call
                .get(&index)
                .cloned()
                .unwrap_or_else(|| self.returns.clone()),
        )
    }

    fn set_returns(&mut self, result: Result<(), StatusError>) {
        self.stub = None;
        self.returns = result;
    }

    fn set_returns_on_call(&mut self, index: usize, result: Result<(), StatusError>) {
        self.stub = None;
        self.returns_on_call.insert(index, result);
    }
}

impl<C> Reply<C> {
    fn resolve(self) -> Result<(), StatusError> {
        match self {
            Self::Stub(stub, call) => stub(&call),
            Self::Fixed(result) => result,
        }
    }
}

#[derive(Default)]
struct WriterState {
    create: Recorder<CreateCall>,
    patch: Recorder<PatchCall>,
    update: Recorder<UpdateCall>,
    invocations: Vec<Invocation>,
}

/// Recording [`StatusWriter`]; every operation succeeds unless told otherwise
#[derive(Default)]
pub struct FakeStatusWriter {
    state: Mutex<WriterState>,
}

impl fmt::Debug for FakeStatusWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeStatusWriter")
            .field("create_calls", &state.create.calls.len())
            .field("patch_calls", &state.patch.calls.len())
            .field("update_calls", &state.update.calls.len())
            .finish()
    }
}

impl FakeStatusWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_call_count(&self) -> usize {
        self.lock().create.calls.len()
    }

    pub fn create_args_for_call(&self, index: usize) -> Option<CreateCall> {
        self.lock().create.calls.get(index).cloned()
    }

    pub fn create_returns(&self, result: Result<(), StatusError>) {
        self.lock().create.set_returns(result);
    }

    pub fn create_returns_on_call(&self, index: usize, result: Result<(), StatusError>) {
        self.lock().create.set_returns_on_call(index, result);
    }

    pub fn create_calls<F>(&self, stub: F)
    where
        F: Fn(&CreateCall) -> Result<(), StatusError> + Send + Sync + 'static,
    {
        self.lock().create.stub = Some(Arc::new(stub));
    }

    pub fn patch_call_count(&self) -> usize {
        self.lock().patch.calls.len()
    }

    pub fn patch_args_for_call(&self, index: usize) -> Option<PatchCall> {
        self.lock().patch.calls.get(index).cloned()
    }

    pub fn patch_returns(&self, result: Result<(), StatusError>) {
        self.lock().patch.set_returns(result);
    }

    pub fn patch_returns_on_call(&self, index: usize, result: Result<(), StatusError>) {
        self.lock().patch.set_returns_on_call(index, result);
    }

    pub fn patch_calls<F>(&self, stub: F)
    where
        F: Fn(&PatchCall) -> Result<(), StatusError> + Send + Sync + 'static,
    {
        self.lock().patch.stub = Some(Arc::new(stub));
    }

    pub fn update_call_count(&self) -> usize {
        self.lock().update.calls.len()
    }

    pub fn update_args_for_call(&self, index: usize) -> Option<UpdateCall> {
        self.lock().update.calls.get(index).cloned()
    }

    pub fn update_returns(&self, result: Result<(), StatusError>) {
        self.lock().update.set_returns(result);
    }

    pub fn update_returns_on_call(&self, index: usize, result: Result<(), StatusError>) {
        self.lock().update.set_returns_on_call(index, result);
    }

    pub fn update_calls<F>(&self, stub: F)
    where
        F: Fn(&UpdateCall) -> Result<(), StatusError> + Send + Sync + 'static,
    {
        self.lock().update.stub = Some(Arc::new(stub));
    }

    /// Snapshot of every call made so far, in call order
    pub fn invocations(&self) -> Vec<Invocation> {
        self.lock().invocations.clone()
    }
}

#[async_trait]
impl StatusWriter for FakeStatusWriter {
    async fn create(
        &self,
        ctx: &CommitContext,
        owner: &BuildRun,
        status: &BuildRunStatus,
        options: &[CreateOption],
    ) -> Result<(), StatusError> {
        let call = CreateCall {
            ctx: ctx.clone(),
            owner: owner.clone(),
            status: status.clone(),
            options: options.to_vec(),
        };
        let reply = {
            let mut state = self.lock();
            state.invocations.push(Invocation::Create(call.clone()));
            state.create.record(call)
        };
        reply.resolve()
    }

    async fn patch(
        &self,
        ctx: &CommitContext,
        owner: &BuildRun,
        patch: &StatusPatch,
        options: &[PatchOption],
    ) -> Result<(), StatusError> {
        let call = PatchCall {
            ctx: ctx.clone(),
            owner: owner.clone(),
            patch: patch.clone(),
            options: options.to_vec(),
        };
        let reply = {
            let mut state = self.lock();
            state.invocations.push(Invocation::Patch(call.clone()));
            state.patch.record(call)
        };
        reply.resolve()
    }

    async fn update(
        &self,
        ctx: &CommitContext,
        owner: &BuildRun,
        options: &[UpdateOption],
    ) -> Result<(), StatusError> {
        let call = UpdateCall {
            ctx: ctx.clone(),
            owner: owner.clone(),
            options: options.to_vec(),
        };
        let reply = {
            let mut state = self.lock();
            state.invocations.push(Invocation::Update(call.clone()));
            state.update.record(call)
        };
        reply.resolve()
    }
}

type GetStub = Arc<dyn Fn(&str, &str) -> Result<BuildRun, StatusError> + Send + Sync>;

#[derive(Default)]
struct ReaderState {
    calls: Vec<(String, String)>,
    stub: Option<GetStub>,
    queued: VecDeque<Result<BuildRun, StatusError>>,
    returns: Option<Result<BuildRun, StatusError>>,
}

/// Recording [`BuildRunReader`]. A stub answers every read when set;
/// otherwise queued replies are served first, then the blanket reply, and
/// with neither configured every read is `NotFound`.
#[derive(Default)]
pub struct FakeBuildRunReader {
    state: Mutex<ReaderState>,
}

impl fmt::Debug for FakeBuildRunReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeBuildRunReader")
            .field("get_calls", &self.lock().calls.len())
            .finish()
    }
}

impl FakeBuildRunReader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// `(namespace, name)` of the n-th read
    pub fn get_args_for_call(&self, index: usize) -> Option<(String, String)> {
        self.lock().calls.get(index).cloned()
    }

    pub fn get_returns(&self, result: Result<BuildRun, StatusError>) {
        self.lock().returns = Some(result);
    }

    /// Answer every read with `stub(namespace, name)`
    pub fn get_calls<F>(&self, stub: F)
    where
        F: Fn(&str, &str) -> Result<BuildRun, StatusError> + Send + Sync + 'static,
    {
        self.lock().stub = Some(Arc::new(stub));
    }

    /// Serve `result` for the next read that has no earlier queued reply
    pub fn push_get_return(&self, result: Result<BuildRun, StatusError>) {
        self.lock().queued.push_back(result);
    }
}

#[async_trait]
impl BuildRunReader for FakeBuildRunReader {
    async fn get(
        &self,
        _ctx: &CommitContext,
        namespace: &str,
        name: &str,
    ) -> Result<BuildRun, StatusError> {
        let stub = {
            let mut state = self.lock();
            state.calls.push((namespace.to_string(), name.to_string()));

            if let Some(result) = state.queued.pop_front() {
                return result;
            }
            match &state.stub {
                Some(stub) => Arc::clone(stub),
                None => {
                    return state.returns.clone().unwrap_or_else(|| {
                        Err(StatusError::NotFound(format!("{namespace}/{name}")))
                    })
                }
            }
        };
        stub(namespace, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::buildrun::test_support::build_run;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn conflict() -> StatusError {
        StatusError::Conflict("stale".to_string())
    }

    #[tokio::test]
    async fn records_calls_and_defaults_to_success() {
        let fake = FakeStatusWriter::new();
        let br = build_run("recorded");
        let ctx = CommitContext::new();
        let patch = StatusPatch::Merge(json!({"status": {}}));

        fake.patch(&ctx, &br, &patch, &[PatchOption::DryRun])
            .await
            .unwrap();

        assert_eq!(fake.patch_call_count(), 1);
        assert_eq!(fake.create_call_count(), 0);
        let call = fake.patch_args_for_call(0).unwrap();
        assert_eq!(call.owner.metadata.name.as_deref(), Some("recorded"));
        assert_eq!(call.patch, patch);
        assert_eq!(call.options, vec![PatchOption::DryRun]);
        assert!(fake.patch_args_for_call(1).is_none());
    }

    #[tokio::test]
    async fn per_call_returns_override_the_blanket_return() {
        let fake = FakeStatusWriter::new();
        fake.update_returns(Err(StatusError::Forbidden("nope".to_string())));
        fake.update_returns_on_call(1, Ok(()));
        let br = build_run("scripted");
        let ctx = CommitContext::new();

        assert!(fake.update(&ctx, &br, &[]).await.is_err());
        assert!(fake.update(&ctx, &br, &[]).await.is_ok());
        assert!(fake.update(&ctx, &br, &[]).await.is_err());
        assert_eq!(fake.update_call_count(), 3);
    }

    #[tokio::test]
    async fn stubs_see_the_call_and_win_until_returns_are_set() {
        let fake = FakeStatusWriter::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        fake.create_calls(move |call| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(call.options, vec![CreateOption::DryRun]);
            Err(conflict())
        });
        let br = build_run("stubbed");
        let ctx = CommitContext::new();
        let status = BuildRunStatus::default();

        let first = fake.create(&ctx, &br, &status, &[CreateOption::DryRun]).await;
        assert_eq!(first, Err(conflict()));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        fake.create_returns(Ok(()));
        let second = fake.create(&ctx, &br, &status, &[CreateOption::DryRun]).await;
        assert_eq!(second, Ok(()));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invocations_keep_cross_operation_order() {
        let fake = FakeStatusWriter::new();
        let br = build_run("ordered");
        let ctx = CommitContext::new();

        fake.update(&ctx, &br, &[]).await.unwrap();
        fake.patch(&ctx, &br, &StatusPatch::Merge(json!({})), &[])
            .await
            .unwrap();
        fake.create(&ctx, &br, &BuildRunStatus::default(), &[])
            .await
            .unwrap();

        let operations: Vec<_> = fake
            .invocations()
            .iter()
            .map(Invocation::operation)
            .collect();
        assert_eq!(operations, vec!["update", "patch", "create"]);
    }

    #[tokio::test]
    async fn concurrent_calls_are_all_recorded() {
        let fake = Arc::new(FakeStatusWriter::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let fake = Arc::clone(&fake);
            handles.push(tokio::spawn(async move {
                let br = build_run(&format!("run-{i}"));
                fake.update(&CommitContext::new(), &br, &[]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(fake.update_call_count(), 16);
        assert_eq!(fake.invocations().len(), 16);
    }

    #[tokio::test]
    async fn reader_serves_queue_then_blanket_then_not_found() {
        let reader = FakeBuildRunReader::new();
        let ctx = CommitContext::new();

        assert!(matches!(
            reader.get(&ctx, "builds", "missing").await,
            Err(StatusError::NotFound(_))
        ));

        let mut queued = build_run("queued");
        queued.metadata.resource_version = Some("7".to_string());
        reader.push_get_return(Ok(queued));
        reader.get_returns(Ok(build_run("blanket")));

        let first = reader.get(&ctx, "builds", "x").await.unwrap();
        assert_eq!(first.metadata.resource_version.as_deref(), Some("7"));
        let second = reader.get(&ctx, "builds", "x").await.unwrap();
        assert_eq!(second.metadata.name.as_deref(), Some("blanket"));

        assert_eq!(reader.get_call_count(), 3);
        assert_eq!(
            reader.get_args_for_call(0),
            Some(("builds".to_string(), "missing".to_string()))
        );
    }
}
