//! Pack/unpack requests.
//!
//! A request is a plain value, not a task: it records the stages still to
//! run (one for a direct transfer, an alternating chain for staged ones),
//! the backend event currently in flight, and the resources that must stay
//! alive until the work lands: the type tree and any staging leases.
//! Waiting is an explicit join; `test` probes and advances without
//! blocking.

use std::collections::VecDeque;
use std::sync::Arc;

use log::trace;

use strata_backend::{CopyDirection, Event, EventStatus, StageLease};
use strata_core::node::TypeNode;

use crate::error::Error;
use crate::runtime::Runtime;

/// Engine phase of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    New,
    Submitted,
    Complete,
    Failed,
}

pub(crate) enum StageOp {
    /// Typed source to flat bytes.
    Pack {
        src: *const u8,
        offset: usize,
        len: usize,
        dst: *mut u8,
    },
    /// Flat bytes to typed destination.
    Unpack {
        src: *const u8,
        len: usize,
        dst: *mut u8,
        offset: usize,
    },
    /// Contiguous staging hop.
    Copy {
        src: *const u8,
        dst: *mut u8,
        len: usize,
        dir: CopyDirection,
    },
}

pub(crate) struct Stage {
    pub backend: usize,
    pub op: StageOp,
}

/// An in-flight or completed pack/unpack.
pub struct Request {
    state: RequestState,
    runtime: Arc<Runtime>,
    node: Arc<TypeNode>,
    count: usize,
    stages: VecDeque<Stage>,
    active: Option<Box<dyn Event>>,
    // Dropped last: staging memory referenced by the stages above.
    _leases: Vec<StageLease>,
}

impl Request {
    /// A request whose work finished before it was built (host paths,
    /// zero-byte transfers).
    pub(crate) fn completed(runtime: Arc<Runtime>, node: Arc<TypeNode>, count: usize) -> Self {
        Request {
            state: RequestState::Complete,
            runtime,
            node,
            count,
            stages: VecDeque::new(),
            active: None,
            _leases: Vec::new(),
        }
    }

    /// Build a request and launch its first stage. The transition out of
    /// `New` is atomic with the backend launch.
    pub(crate) fn launch(
        runtime: Arc<Runtime>,
        node: Arc<TypeNode>,
        count: usize,
        stages: Vec<Stage>,
        leases: Vec<StageLease>,
    ) -> Result<Self, Error> {
        let mut request = Request {
            state: RequestState::New,
            runtime,
            node,
            count,
            stages: stages.into(),
            active: None,
            _leases: leases,
        };
        match request.stages.pop_front() {
            Some(stage) => request.launch_stage(stage)?,
            None => request.state = RequestState::Complete,
        }
        Ok(request)
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Block until the work completes or fails; consumes the request.
    pub fn wait(mut self) -> Result<(), Error> {
        self.advance(true).map(|done| debug_assert!(done))
    }

    /// Probe and advance without blocking. `Ok(true)` once complete.
    pub fn test(&mut self) -> Result<bool, Error> {
        self.advance(false)
    }

    fn advance(&mut self, blocking: bool) -> Result<bool, Error> {
        match self.state {
            RequestState::Complete => return Ok(true),
            RequestState::Failed => return Err(Error::RequestFailed),
            RequestState::New | RequestState::Submitted => {}
        }
        loop {
            if let Some(event) = self.active.as_mut() {
                let status = if blocking {
                    event.wait().map(|()| EventStatus::Complete)
                } else {
                    event.query()
                };
                match status {
                    Ok(EventStatus::Pending) => return Ok(false),
                    Ok(EventStatus::Complete) => self.active = None,
                    Err(e) => {
                        self.fail();
                        return Err(Error::Backend(e));
                    }
                }
            }
            match self.stages.pop_front() {
                Some(stage) => self.launch_stage(stage)?,
                None => {
                    self.state = RequestState::Complete;
                    return Ok(true);
                }
            }
        }
    }

    fn launch_stage(&mut self, stage: Stage) -> Result<(), Error> {
        let backend = self.runtime.registry.backend(stage.backend);
        let state = self.node.backend_state(stage.backend);
        trace!("launch stage on backend {}", backend.name());
        let launched = unsafe {
            match stage.op {
                StageOp::Pack {
                    src,
                    offset,
                    len,
                    dst,
                } => backend.ipack(src, self.count, &self.node, state, offset, dst, len),
                StageOp::Unpack {
                    src,
                    len,
                    dst,
                    offset,
                } => backend.iunpack(src, len, dst, self.count, &self.node, state, offset),
                StageOp::Copy { src, dst, len, dir } => backend.icopy(src, dst, len, dir),
            }
        };
        match launched {
            Ok(event) => {
                self.active = Some(event);
                self.state = RequestState::Submitted;
                Ok(())
            }
            Err(e) => {
                self.fail();
                Err(Error::Backend(e))
            }
        }
    }

    fn fail(&mut self) {
        self.state = RequestState::Failed;
        self.stages.clear();
        self.active = None;
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        // Join abandoned work so the staging leases and the destination
        // buffer are no longer referenced once the value is gone.
        if matches!(self.state, RequestState::New | RequestState::Submitted) {
            let _ = self.advance(true);
        }
    }
}
