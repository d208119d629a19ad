use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::query_options::{ErrorCallback, SettledCallback, SuccessCallback};
use crate::{QueryClient, QueryError, QueryKey};

/// Lifecycle of a mutation handle. Unlike queries there is no fetch-status
/// axis; a mutation is either running or settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationStatus {
    /// Never run, or reset.
    #[default]
    Idle,
    /// The latest call is running.
    Pending,
    /// The latest call settled with data.
    Success,
    /// The latest call settled with an error.
    Error,
}

/// Options for a mutation handle.
pub struct MutationOptions<T> {
    /// Query keys invalidated after every successful call. Active handles on
    /// those keys refetch.
    pub invalidates: Vec<QueryKey>,
    pub(crate) on_success: Option<SuccessCallback<T>>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) on_settled: Option<SettledCallback>,
}

impl<T> Default for MutationOptions<T> {
    fn default() -> Self {
        MutationOptions {
            invalidates: Vec::new(),
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }
}

impl<T> MutationOptions<T> {
    /// Set the keys invalidated on success.
    pub fn invalidates(self, invalidates: Vec<QueryKey>) -> Self {
        MutationOptions {
            invalidates,
            ..self
        }
    }

    /// Called once per successful call with the returned value, after the
    /// invalidations ran.
    pub fn on_success(self, callback: impl Fn(&T) + 'static) -> Self {
        MutationOptions {
            on_success: Some(Rc::new(callback)),
            ..self
        }
    }

    /// Called once per failed call.
    pub fn on_error(self, callback: impl Fn(&QueryError) + 'static) -> Self {
        MutationOptions {
            on_error: Some(Rc::new(callback)),
            ..self
        }
    }

    /// Called once after every settle, success or failure.
    pub fn on_settled(self, callback: impl Fn() + 'static) -> Self {
        MutationOptions {
            on_settled: Some(Rc::new(callback)),
            ..self
        }
    }
}

pub(crate) type Mutator<A, T> = Rc<dyn Fn(A) -> LocalBoxFuture<'static, Result<T, QueryError>>>;

/// A handle for running side-effecting calls that push fresh data into the
/// cache by invalidating the query keys they touched.
///
/// Created by [`QueryClient::mutation`](crate::QueryClient::mutation).
/// Mutations are never retried and never cached; each call runs exactly once.
/// When calls overlap, the status and data reflect the latest call only.
pub struct MutationHandle<A, T>
where
    A: 'static,
    T: Clone + 'static,
{
    inner: Rc<MutationInner<A, T>>,
}

struct MutationInner<A, T> {
    client: QueryClient,
    options: MutationOptions<T>,
    mutator: Mutator<A, T>,
    status: Cell<MutationStatus>,
    data: RefCell<Option<T>>,
    error: RefCell<Option<QueryError>>,
    // Bumped per call; a superseded call cannot write status or data.
    generation: Cell<u64>,
}

impl<A, T> MutationHandle<A, T>
where
    A: 'static,
    T: Clone + 'static,
{
    pub(crate) fn new(client: QueryClient, mutator: Mutator<A, T>, options: MutationOptions<T>) -> Self {
        MutationHandle {
            inner: Rc::new(MutationInner {
                client,
                options,
                mutator,
                status: Cell::new(MutationStatus::Idle),
                data: RefCell::new(None),
                error: RefCell::new(None),
                generation: Cell::new(0),
            }),
        }
    }

    /// Fire-and-forget call. The outcome lands in
    /// [`status`](Self::status) / [`data`](Self::data) / [`error`](Self::error).
    pub fn mutate(&self, args: A) {
        let inner = self.inner.clone();
        let generation = begin_call(&inner);
        tokio::task::spawn_local(async move {
            let result = (inner.mutator)(args).await;
            settle(&inner, generation, result);
        });
    }

    /// Runs the call and returns its outcome, while also updating the handle
    /// state like [`mutate`](Self::mutate).
    pub async fn mutate_async(&self, args: A) -> Result<T, QueryError> {
        let inner = self.inner.clone();
        let generation = begin_call(&inner);
        let result = (inner.mutator)(args).await;
        settle(&inner, generation, result.clone());
        result
    }

    /// Status of the latest call.
    pub fn status(&self) -> MutationStatus {
        self.inner.status.get()
    }

    /// The latest call is still running.
    pub fn is_pending(&self) -> bool {
        self.status() == MutationStatus::Pending
    }

    /// Value returned by the latest successful call.
    pub fn data(&self) -> Option<T> {
        self.inner.data.try_borrow().expect("data borrow").clone()
    }

    /// Error of the latest failed call.
    pub fn error(&self) -> Option<QueryError> {
        self.inner.error.try_borrow().expect("error borrow").clone()
    }

    /// Returns the handle to `Idle`, clearing data and error. A call still in
    /// flight is disowned; its settle is discarded.
    pub fn reset(&self) {
        let inner = &self.inner;
        inner.generation.set(inner.generation.get() + 1);
        inner.status.set(MutationStatus::Idle);
        inner.data.try_borrow_mut().expect("reset borrow_mut").take();
        inner
            .error
            .try_borrow_mut()
            .expect("reset borrow_mut")
            .take();
    }
}

fn begin_call<A, T>(inner: &MutationInner<A, T>) -> u64 {
    let generation = inner.generation.get() + 1;
    inner.generation.set(generation);
    inner.status.set(MutationStatus::Pending);
    generation
}

fn settle<A, T>(inner: &Rc<MutationInner<A, T>>, generation: u64, result: Result<T, QueryError>)
where
    T: Clone,
{
    if inner.generation.get() != generation {
        return;
    }
    match result {
        Ok(value) => {
            inner.status.set(MutationStatus::Success);
            *inner.data.try_borrow_mut().expect("settle borrow_mut") = Some(value.clone());
            inner.error.try_borrow_mut().expect("settle borrow_mut").take();
            for key in &inner.options.invalidates {
                inner.client.invalidate_query(key);
            }
            if let Some(on_success) = &inner.options.on_success {
                on_success(&value);
            }
            if let Some(on_settled) = &inner.options.on_settled {
                on_settled();
            }
        }
        Err(error) => {
            inner.status.set(MutationStatus::Error);
            *inner.error.try_borrow_mut().expect("settle borrow_mut") = Some(error.clone());
            if let Some(on_error) = &inner.options.on_error {
                on_error(&error);
            }
            if let Some(on_settled) = &inner.options.on_settled {
                on_settled();
            }
        }
    }
}
