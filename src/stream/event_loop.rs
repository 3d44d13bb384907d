use crate::core::errors::StreamError;
use crate::core::kernel::ws::{Transport, TransportEvent, TransportFactory};
use crate::stream::dispatcher::MessageDispatcher;
use crate::stream::registry::EndpointRegistry;
use crate::stream::supervisor::ConnectionSupervisor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use std::thread;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    /// Transport allocated, loop not running
    Initialized,
    Running,
    /// Loop exited and the transport was torn down; `init` may run again
    Stopped,
}

/// Cloneable handle that stops a running loop from any thread
#[derive(Debug, Clone)]
pub struct KillSwitch(Arc<AtomicBool>);

impl KillSwitch {
    pub fn kill(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Owns the transport context and pumps it.
///
/// The transport sits in `slot` while the controller is initialised and is
/// moved onto the looping thread for the duration of `enter_event_loop`, so
/// no other thread can reach it while the loop runs.
pub struct EventLoopController {
    registry: Arc<EndpointRegistry>,
    supervisor: ConnectionSupervisor,
    dispatcher: MessageDispatcher,
    factory: Arc<dyn TransportFactory>,
    slot: Mutex<Option<Box<dyn Transport>>>,
    state: Mutex<LoopState>,
    cancelled: Arc<AtomicBool>,
    slice: Duration,
    shutdown_grace: Duration,
}

impl EventLoopController {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        supervisor: ConnectionSupervisor,
        factory: Arc<dyn TransportFactory>,
        slice: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        let dispatcher = MessageDispatcher::new(Arc::clone(&registry));
        Self {
            registry,
            supervisor,
            dispatcher,
            factory,
            slot: Mutex::new(None),
            state: Mutex::new(LoopState::Uninitialized),
            cancelled: Arc::new(AtomicBool::new(false)),
            slice,
            shutdown_grace,
        }
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn state(&self) -> LoopState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kill_switch(&self) -> KillSwitch {
        KillSwitch(Arc::clone(&self.cancelled))
    }

    /// Allocate the transport context
    #[instrument(skip(self))]
    pub fn init(&self) -> Result<(), StreamError> {
        let mut state = self.lock_state();
        match *state {
            LoopState::Uninitialized | LoopState::Stopped => {}
            LoopState::Initialized => {
                debug!("stream controller already initialised");
                return Ok(());
            }
            LoopState::Running => return Err(StreamError::AlreadyRunning),
        }

        let transport = self
            .factory
            .create()
            .map_err(|e| StreamError::Init(e.to_string()))?;
        *self.lock_slot() = Some(transport);
        *state = LoopState::Initialized;
        info!("stream controller initialised");
        Ok(())
    }

    /// Only sets the cancellation flag; the loop notices within one slice
    pub fn kill_all(&self) {
        info!("stream event loop cancellation requested");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Run the loop on the calling thread until killed or `max_duration`
    /// elapses, then tear the transport down and clear the registry.
    #[instrument(skip(self))]
    pub fn enter_event_loop(&self, max_duration: Duration) -> Result<(), StreamError> {
        let transport = {
            let mut state = self.lock_state();
            match *state {
                LoopState::Initialized => {}
                LoopState::Running => return Err(StreamError::AlreadyRunning),
                LoopState::Uninitialized | LoopState::Stopped => {
                    return Err(StreamError::NotInitialized)
                }
            }
            let Some(transport) = self.lock_slot().take() else {
                return Err(StreamError::NotInitialized);
            };
            *state = LoopState::Running;
            transport
        };
        let mut running = RunningLoop {
            controller: self,
            transport,
        };

        info!(
            max_secs = max_duration.as_secs(),
            endpoints = self.registry.len(),
            "entering stream event loop"
        );

        let deadline = Instant::now().checked_add(max_duration);
        let mut iterations: u64 = 0;
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                info!(iterations, "stream event loop cancelled");
                break;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        info!(iterations, "stream event loop reached its time limit");
                        break;
                    }
                    remaining.min(self.slice)
                }
                None => self.slice,
            };

            self.iterate(running.transport.as_mut(), slice);
            iterations += 1;
        }

        drop(running);
        info!("stream event loop stopped");
        Ok(())
    }

    /// Run a single iteration on an initialised controller.
    ///
    /// For callers that drive the loop from their own scheduler; it must not
    /// be mixed with a running `enter_event_loop`.
    pub fn pump(&self, slice: Duration) -> Result<(), StreamError> {
        {
            let mut slot = self.lock_slot();
            if let Some(transport) = slot.as_mut() {
                self.iterate(transport.as_mut(), slice);
                return Ok(());
            }
        }
        match self.state() {
            LoopState::Running => Err(StreamError::AlreadyRunning),
            _ => Err(StreamError::NotInitialized),
        }
    }

    /// Tear down an initialised controller that is driven through `pump`
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        if *state != LoopState::Initialized {
            return;
        }
        if let Some(mut transport) = self.lock_slot().take() {
            self.teardown(transport.as_mut());
        }
        *state = LoopState::Stopped;
        info!("stream controller shut down");
    }

    fn iterate(&self, transport: &mut dyn Transport, slice: Duration) {
        self.supervisor.reconcile(transport, Instant::now());

        for event in transport.service(slice) {
            match event {
                TransportEvent::Established(handle) => self.supervisor.on_established(handle),
                TransportEvent::Received(handle, payload) => {
                    self.dispatcher.dispatch(handle, &payload);
                }
                TransportEvent::Pong(handle) => self.supervisor.on_pong(handle),
                TransportEvent::ConnectionError(handle, reason)
                | TransportEvent::Closed(handle, reason) => {
                    self.supervisor.on_failure(handle, &reason);
                }
            }
        }
    }

    // Caller owns the state transition and drops the transport afterwards
    fn teardown(&self, transport: &mut dyn Transport) {
        let handles = self.registry.clear();
        debug!(connections = handles.len(), "closing stream connections");
        for handle in handles {
            transport.close(handle);
        }
        transport.shutdown(self.shutdown_grace);

        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// The transport while `enter_event_loop` owns it. Dropping it tears the
/// transport down and leaves the controller `Stopped`, on unwind too.
struct RunningLoop<'a> {
    controller: &'a EventLoopController,
    transport: Box<dyn Transport>,
}

impl Drop for RunningLoop<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            warn!("stream event loop unwinding, tearing down transport");
        }
        self.controller.teardown(self.transport.as_mut());
        *self.controller.lock_state() = LoopState::Stopped;
    }
}
