use crate::error::FieldError;
use crate::fields::FieldsResolver;
use crate::logic::FetchOptions;
use crate::model::ModelRegistry;
use crate::store::{QuerySourceResolver, SavedViewState};
use log::debug;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Everything that exists only once the whole schema graph was built.
pub struct BindContext {
    pub resolver: Arc<FieldsResolver>,
    pub models: Arc<ModelRegistry>,
    pub sources: Arc<dyn QuerySourceResolver>,
    pub view_state: Option<Arc<dyn SavedViewState>>,
    /// Options for relation lookups triggered outside the orchestrator.
    pub fetch_options: FetchOptions,
}

pub type DeferredBind = Box<dyn FnOnce(&BindContext) -> Result<(), FieldError> + Send>;

enum InitState {
    Collecting(Vec<DeferredBind>),
    // the owner of the bound schema keeps the context alive
    Bound(Weak<BindContext>),
}

/// Second initialization phase.
///
/// Fields register jobs while models are still being built; `bind` runs them
/// in registration order once every model exists. Jobs registered after
/// binding run immediately, for as long as the bound context is alive.
pub struct InitQueue {
    state: Mutex<InitState>,
}

impl Default for InitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InitQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InitState::Collecting(Vec::new())),
        }
    }

    pub fn defer(&self, job: DeferredBind) -> Result<(), FieldError> {
        let context = {
            let mut state = self.state.lock();
            match &mut *state {
                InitState::Collecting(jobs) => {
                    jobs.push(job);
                    return Ok(());
                }
                InitState::Bound(context) => context.upgrade(),
            }
        };
        match context {
            Some(context) => job(&context),
            None => Err(FieldError::InvalidSchema(
                "schema was dropped before the field was bound".to_string(),
            )),
        }
    }

    pub fn bind(&self, context: BindContext) -> Result<Arc<BindContext>, FieldError> {
        let context = Arc::new(context);
        let jobs = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, InitState::Bound(Arc::downgrade(&context))) {
                InitState::Collecting(jobs) => jobs,
                InitState::Bound(previous) => {
                    *state = InitState::Bound(previous);
                    return Err(FieldError::InvalidSchema(
                        "schema fields are already bound".to_string(),
                    ));
                }
            }
        };
        debug!("Running {} deferred field binds", jobs.len());
        for job in jobs {
            job(&context)?;
        }
        Ok(context)
    }

    pub fn is_bound(&self) -> bool {
        matches!(&*self.state.lock(), InitState::Bound(_))
    }

    pub fn pending(&self) -> usize {
        match &*self.state.lock() {
            InitState::Collecting(jobs) => jobs.len(),
            InitState::Bound(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Schema;
    use crate::store::SourceRegistry;

    fn context() -> BindContext {
        BindContext {
            resolver: Arc::new(FieldsResolver::new(Arc::new(Schema::default()))),
            models: Arc::new(ModelRegistry::new()),
            sources: Arc::new(SourceRegistry::new()),
            view_state: None,
            fetch_options: FetchOptions::default(),
        }
    }

    #[test]
    fn test_jobs_run_in_order_on_bind() {
        let queue = InitQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            queue
                .defer(Box::new(move |_| {
                    log.lock().push(i);
                    Ok(())
                }))
                .unwrap();
        }
        assert_eq!(queue.pending(), 3);
        assert!(log.lock().is_empty());

        queue.bind(context()).unwrap();
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert!(queue.is_bound());
    }

    #[test]
    fn test_late_job_runs_immediately() {
        let queue = InitQueue::new();
        let _bound = queue.bind(context()).unwrap();

        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        queue
            .defer(Box::new(move |_| {
                *flag.lock() = true;
                Ok(())
            }))
            .unwrap();
        assert!(*ran.lock());
    }

    #[test]
    fn test_second_bind_is_rejected() {
        let queue = InitQueue::new();
        queue.bind(context()).unwrap();
        assert!(queue.bind(context()).is_err());
    }

    #[test]
    fn test_late_job_fails_once_context_is_dropped() {
        let queue = InitQueue::new();
        let context = queue.bind(context()).unwrap();
        drop(context);

        let result = queue.defer(Box::new(|_| Ok(())));
        assert!(matches!(result, Err(FieldError::InvalidSchema(_))));
    }
}
