use crate::{Instant, QueryError};

/// Data availability for a query.
///
/// Orthogonal to [`FetchStatus`]: a successful entry can be refetching in the
/// background without leaving `Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    /// No settled result yet.
    #[default]
    Pending,
    /// The last settled fetch produced data.
    Success,
    /// The last settled fetch exhausted its retries.
    Error,
}

/// In-flight axis of a query, independent of [`QueryStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStatus {
    /// Nothing in flight.
    #[default]
    Idle,
    /// A fetch (initial or background) is running.
    Fetching,
}

/// The latest data for a query.
#[derive(Clone, PartialEq, Eq)]
pub struct QueryData<V> {
    /// The data.
    pub data: V,
    /// The instant this data was retrieved.
    pub updated_at: Instant,
}

impl<V> QueryData<V> {
    /// Wraps `data` with the current time as its write timestamp.
    pub fn now(data: V) -> Self {
        QueryData {
            data,
            updated_at: Instant::now(),
        }
    }
}

impl<V> std::fmt::Debug for QueryData<V>
where
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryData")
            .field("data", &self.data)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Snapshot of one cache entry.
///
/// Invariants: `status == Success` implies `data` is present, and
/// `status == Error` implies `error` is present. A query function that
/// legitimately resolves to `None` (with `V = Option<T>`) is still recorded
/// as success: "no data" and "null data" are distinguishable.
#[derive(Clone, PartialEq)]
pub struct QueryState<V> {
    /// Data availability.
    pub status: QueryStatus,
    /// In-flight state.
    pub fetch_status: FetchStatus,
    /// Last successful result, kept across background refetches and errors.
    pub data: Option<QueryData<V>>,
    /// Last terminal error, cleared on the next successful write.
    pub error: Option<QueryError>,
}

impl<V> Default for QueryState<V> {
    fn default() -> Self {
        QueryState {
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
            data: None,
            error: None,
        }
    }
}

impl<V> QueryState<V> {
    /// The data contained in this snapshot, if any.
    pub fn data(&self) -> Option<&V> {
        self.data.as_ref().map(|d| &d.data)
    }

    /// When the data was last written, if any.
    pub fn updated_at(&self) -> Option<Instant> {
        self.data.as_ref().map(|d| d.updated_at)
    }

    /// `status == Pending`.
    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    /// First-ever fetch: pending with a fetch in flight.
    pub fn is_loading(&self) -> bool {
        self.is_pending() && self.is_fetching()
    }

    /// A fetch is in flight, background refetches included.
    pub fn is_fetching(&self) -> bool {
        self.fetch_status == FetchStatus::Fetching
    }

    /// `status == Success`.
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// `status == Error`.
    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }
}

impl<V> std::fmt::Debug for QueryState<V>
where
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryState")
            .field("status", &self.status)
            .field("fetch_status", &self.fetch_status)
            .field("data", &self.data)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_pending_and_idle() {
        let state = QueryState::<u32>::default();
        assert!(state.is_pending());
        assert!(!state.is_fetching());
        assert!(!state.is_loading());
        assert!(state.data().is_none());
    }

    #[test]
    fn loading_requires_both_axes() {
        let mut state = QueryState::<u32>::default();
        state.fetch_status = FetchStatus::Fetching;
        assert!(state.is_loading());

        state.status = QueryStatus::Success;
        state.data = Some(QueryData::now(1));
        assert!(state.is_fetching(), "background refetch is still fetching");
        assert!(!state.is_loading(), "but no longer loading");
    }

    #[test]
    fn null_success_is_distinguishable_from_no_data() {
        let mut state = QueryState::<Option<u32>>::default();
        assert!(state.data().is_none());

        state.status = QueryStatus::Success;
        state.data = Some(QueryData::now(None));
        assert_eq!(state.data(), Some(&None));
    }
}
