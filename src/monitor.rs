use std::pin::Pin;
use std::sync::{Arc, RwLock};

use futures::{stream, Stream, StreamExt};
use stream_cancel::{Trigger, Valved};
use tokio::sync::broadcast::{self, Sender};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};

use crate::controller::{Controller, Event, Request};
use crate::host::Host;
use crate::presenter::DisplayUpdate;

const DEFAULT_UPDATE_CAPACITY: usize = 64;

pub struct MonitorConfig {
    /// How many display updates a slow update stream may fall behind before it skips ahead.
    update_capacity: usize,
    /// Whether to look for heart rate devices among those the host already knows on start.
    discover_known_devices: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            update_capacity: DEFAULT_UPDATE_CAPACITY,
            discover_known_devices: true,
        }
    }
}

impl MonitorConfig {
    pub fn update_capacity(mut self, capacity: usize) -> Self {
        self.update_capacity = capacity.max(1);
        self
    }

    /// Only track devices whose Heart Rate service shows up after the monitor started.
    pub fn skip_known_devices(mut self) -> Self {
        self.discover_known_devices = false;
        self
    }
}

/// Tracks heart rate devices and the measurements of the selected one.
///
/// All state lives in a single task. User input and host events are fed to it in order, while
/// each host call it needs runs as its own task and reports back when done.
pub struct Monitor {
    config: MonitorConfig,
    update_sender: Sender<DisplayUpdate>,
    inbox: Option<UnboundedSender<Event>>,
    stopper: Option<Trigger>,
    update_stream_stoppers: Arc<RwLock<Vec<Trigger>>>,
}

impl Default for Monitor {
    fn default() -> Self {
        Monitor::new(MonitorConfig::default())
    }
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        let (update_sender, _) = broadcast::channel(config.update_capacity);

        Self {
            config,
            update_sender,
            inbox: None,
            stopper: None,
            update_stream_stoppers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Hands the current update channel and its streams over to a stopping run, and sets up
    /// fresh ones for the next run.
    fn detach_updates(&mut self) {
        let (update_sender, _) = broadcast::channel(self.config.update_capacity);
        self.update_sender = update_sender;
        self.update_stream_stoppers = Arc::new(RwLock::new(Vec::new()));
    }

    /// Start tracking devices of the given host. Must be called within a tokio runtime.
    pub fn start<H: Host>(&mut self, host: Arc<H>) {
        if self.inbox.is_some() {
            log::info!("Monitor is already started.");
            return;
        }

        log::info!("Starting the monitor");

        let (inbox, receiver) = mpsc::unbounded_channel();
        let events: Pin<Box<dyn Stream<Item = Event> + Send>> = Box::pin(stream::select(
            host.events().map(Event::from),
            UnboundedReceiverStream::new(receiver),
        ));
        let (stopper, events) = Valved::new(events);

        let ctx = MonitorContext {
            controller: Controller::new(self.update_sender.clone()),
            host,
            inbox: inbox.clone(),
        };
        let discover_known_devices = self.config.discover_known_devices;
        let update_stream_stoppers = self.update_stream_stoppers.clone();

        tokio::spawn(async move {
            ctx.listen(events, discover_known_devices, update_stream_stoppers)
                .await;
        });

        self.inbox = Some(inbox);
        self.stopper = Some(stopper);
    }

    /// Stop tracking.
    ///
    /// Update streams created so far receive a final [`DisplayUpdate::FieldsCleared`] and then
    /// end. Streams created afterwards belong to the next [`start`](Monitor::start).
    pub fn stop(&mut self) {
        if self.inbox.take().is_some() {
            // The stopping task owns the old channel and stoppers from here on.
            self.stopper.take();
            self.detach_updates();
        } else {
            log::info!("Monitor is already stopped");
        }
    }

    /// Select the device with the given address, or clear the selection with `None`.
    pub fn select_device(&self, address: Option<String>) {
        match &self.inbox {
            Some(inbox) => {
                inbox.send(Event::DeviceSelected(address)).ok();
            }
            None => log::info!("Monitor is not started, ignoring device selection"),
        }
    }

    /// Create a new stream that receives display updates.
    ///
    /// Only updates produced after this call are received.
    pub fn update_stream(&mut self) -> Valved<Pin<Box<dyn Stream<Item = DisplayUpdate> + Send>>> {
        let receiver = self.update_sender.subscribe();

        let stream: Pin<Box<dyn Stream<Item = DisplayUpdate> + Send>> =
            Box::pin(BroadcastStream::new(receiver).filter_map(|x| async move { x.ok() }));

        let (trigger, stream) = Valved::new(stream);
        self.update_stream_stoppers.write().unwrap().push(trigger);

        stream
    }
}

struct MonitorContext<H> {
    controller: Controller<Sender<DisplayUpdate>>,
    host: Arc<H>,
    /// Completed host calls are sent back through here.
    inbox: UnboundedSender<Event>,
}

impl<H: Host> MonitorContext<H> {
    async fn listen(
        mut self,
        mut events: Valved<Pin<Box<dyn Stream<Item = Event> + Send>>>,
        discover_known_devices: bool,
        update_stream_stoppers: Arc<RwLock<Vec<Trigger>>>,
    ) {
        let requests = self.controller.start(discover_known_devices);
        self.dispatch(requests);

        while let Some(event) = events.next().await {
            log::trace!("Event: {:?}", event);

            let requests = self.controller.handle(event);
            self.dispatch(requests);
        }

        self.controller.teardown();
        // Streams of this run end once they have drained the updates sent so far, when the
        // controller drops the last sender of the channel.
        for stopper in update_stream_stoppers.write().unwrap().drain(..) {
            stopper.disable();
        }

        log::info!("Monitor was stopped.");
    }

    fn dispatch(&self, requests: Vec<Request>) {
        for request in requests {
            log::trace!("Request: {:?}", request);

            let host = self.host.clone();
            let inbox = self.inbox.clone();
            tokio::spawn(async move {
                let event = execute(host.as_ref(), request).await;
                // The monitor may have stopped while the call was pending.
                inbox.send(event).ok();
            });
        }
    }
}

async fn execute<H: Host>(host: &H, request: Request) -> Event {
    match request {
        Request::KnownDevices => Event::KnownDevices(host.known_devices().await),
        Request::Device { address, purpose } => {
            let result = host.device(&address).await;
            Event::Device {
                address,
                purpose,
                result,
            }
        }
        Request::Services { address, purpose } => {
            let result = host.services(&address).await;
            Event::Services {
                address,
                purpose,
                result,
            }
        }
        Request::Characteristics(service) => {
            let result = host.characteristics(&service).await;
            Event::Characteristics { service, result }
        }
    }
}
