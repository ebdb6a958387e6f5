//! Scripted service, settle and resolver doubles shared by the session tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use dvr_control::address::AddressResolver;
use dvr_control::mode::{ModeWatch, Settle};
use dvr_control::transport::{ServiceLocator, Transport};
use dvr_control::{ControlError, IpcError, ModeState, SessionController, SessionOptions};
use dvr_proto::protocol::{
    read_frame, write_frame, Request, Response, CMD_GET_MODE, CMD_GET_VERSION, MODE_OFF,
};

/// Something the scripted service or settle observed, with the controller's
/// mode at that instant.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Dispatch { command: u32, mode_seen: Option<ModeState> },
    Settle { delay: Duration, mode_seen: Option<ModeState> },
    Close,
}

pub struct ServiceState {
    pub running: bool,
    /// `None` makes the version query fail.
    pub version: Option<u32>,
    pub mode: u32,
    pub mode_query_fails: bool,
    pub change_fails: bool,
    /// Whether a mode-change command actually changes `mode`.
    pub apply_changes: bool,
    pub opens: u32,
    pub events: Vec<Event>,
    watch: Option<ModeWatch>,
}

#[derive(Clone)]
pub struct FakeService(pub Rc<RefCell<ServiceState>>);

impl FakeService {
    pub fn new(version: u32) -> Self {
        Self(Rc::new(RefCell::new(ServiceState {
            running: true,
            version: Some(version),
            mode: MODE_OFF,
            mode_query_fails: false,
            change_fails: false,
            apply_changes: true,
            opens: 0,
            events: Vec::new(),
            watch: None,
        })))
    }

    pub fn not_running() -> Self {
        let service = Self::new(10);
        service.0.borrow_mut().running = false;
        service
    }

    pub fn state(&self) -> std::cell::RefMut<'_, ServiceState> {
        self.0.borrow_mut()
    }

    pub fn attach(&self, watch: ModeWatch) {
        self.0.borrow_mut().watch = Some(watch);
    }

    fn seen(&self) -> Option<ModeState> {
        self.0.borrow().watch.as_ref().map(|w| w.get())
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.0.borrow_mut().events.clear();
    }

    pub fn dispatched(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Dispatch { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Close))
            .count()
    }
}

pub struct FakeTransport(FakeService);

impl Transport for FakeTransport {
    fn dispatch(&mut self, command: u32, _payload: &[u8]) -> Result<Response, IpcError> {
        let mode_seen = self.0.seen();
        let mut state = self.0.state();
        state.events.push(Event::Dispatch { command, mode_seen });

        let response = match command {
            CMD_GET_VERSION => match state.version {
                Some(v) => Response::success_u32(v),
                None => Response::failure(0x1),
            },
            CMD_GET_MODE if state.mode_query_fails => Response::failure(0x2),
            CMD_GET_MODE => Response::success_u32(state.mode),
            1..=4 if state.change_fails => Response::failure(0xdead),
            1..=4 => {
                if state.apply_changes {
                    state.mode = command;
                }
                Response::success(&[])
            }
            _ => Response::failure(0xf601),
        };
        Ok(response)
    }

    fn close(&mut self) {
        self.0.state().events.push(Event::Close);
    }
}

pub struct FakeLocator(pub FakeService);

impl ServiceLocator for FakeLocator {
    type Transport = FakeTransport;

    fn is_running(&self, _service: &str) -> bool {
        self.0 .0.borrow().running
    }

    fn open(&self, _service: &str) -> Result<FakeTransport, IpcError> {
        self.0.state().opens += 1;
        Ok(FakeTransport(self.0.clone()))
    }
}

/// Records the delay instead of sleeping.
pub struct RecordingSettle(pub FakeService);

impl Settle for RecordingSettle {
    fn settle(&self, delay: Duration) {
        let mode_seen = self.0.seen();
        self.0.state().events.push(Event::Settle { delay, mode_seen });
    }
}

/// Returns the queued values in order; `None` entries fail.  Repeats the last
/// entry once the queue is down to one.
#[derive(Clone)]
pub struct ScriptedResolver(pub Rc<RefCell<Vec<Option<u32>>>>);

impl ScriptedResolver {
    pub fn new(script: Vec<Option<u32>>) -> Self {
        Self(Rc::new(RefCell::new(script)))
    }
}

impl AddressResolver for ScriptedResolver {
    fn resolve(&self) -> Result<u32, ControlError> {
        let mut script = self.0.borrow_mut();
        let next = if script.len() > 1 {
            script.remove(0)
        } else {
            script.first().copied().flatten()
        };
        next.ok_or_else(|| ControlError::AddressUnavailable("scripted failure".into()))
    }
}

pub fn controller(service: &FakeService) -> SessionController<FakeLocator> {
    controller_with(service, SessionOptions::default(), ScriptedResolver::new(vec![None]))
}

pub fn controller_with(
    service: &FakeService,
    options: SessionOptions,
    resolver: ScriptedResolver,
) -> SessionController<FakeLocator> {
    let session = SessionController::new(
        FakeLocator(service.clone()),
        options,
        Box::new(RecordingSettle(service.clone())),
        Box::new(resolver),
    );
    service.attach(session.mode_watch());
    session
}

/// No-op settle for tests that talk to a real socket.
pub struct NoSettle;

impl Settle for NoSettle {
    fn settle(&self, _delay: Duration) {}
}

/// Minimal capture service on a loopback socket.  Serves one connection and
/// returns every command it received once the client hangs up.
pub fn spawn_tcp_service(version: u32, initial_mode: u32) -> (String, JoinHandle<Vec<u32>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let address = listener.local_addr().expect("local addr").to_string();

    let handle = std::thread::spawn(move || {
        let mut seen = Vec::new();
        let Ok((mut stream, _)) = listener.accept() else {
            return seen;
        };
        let mut mode = initial_mode;
        while let Ok(frame) = read_frame(&mut stream) {
            let Ok((request, _)) = Request::decode(&frame) else {
                break;
            };
            seen.push(request.command);
            let response = match request.command {
                CMD_GET_VERSION => Response::success_u32(version),
                CMD_GET_MODE => Response::success_u32(mode),
                1..=4 => {
                    mode = request.command;
                    Response::success(&[])
                }
                _ => Response::failure(0xf601),
            };
            if write_frame(&mut stream, &response.encode()).is_err() {
                break;
            }
        }
        seen
    });

    (address, handle)
}

/// Misbehaviour injected at a given request index (counted across all
/// connections, starting at 0).
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Sleep before replying, then send the reply anyway.
    Stall(Duration),
    /// Close the connection without replying.
    HangUp,
    /// Send the first half of the reply, then close.
    PartialReply,
}

/// Loopback service that accepts any number of connections, shares one mode
/// between them and misbehaves on scripted requests.
pub struct FaultyTcpService {
    pub address: String,
    mode: Arc<Mutex<u32>>,
    commands: Arc<Mutex<Vec<u32>>>,
    connections: Arc<AtomicUsize>,
}

impl FaultyTcpService {
    pub fn mode(&self) -> u32 {
        *self.mode.lock().unwrap()
    }

    /// Change the mode behind the controller's back.
    pub fn set_mode(&self, mode: u32) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn commands(&self) -> Vec<u32> {
        self.commands.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

pub fn spawn_faulty_tcp_service(
    version: u32,
    initial_mode: u32,
    faults: Vec<(usize, Fault)>,
) -> FaultyTcpService {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let service = FaultyTcpService {
        address: listener.local_addr().expect("local addr").to_string(),
        mode: Arc::new(Mutex::new(initial_mode)),
        commands: Arc::new(Mutex::new(Vec::new())),
        connections: Arc::new(AtomicUsize::new(0)),
    };

    let mode = service.mode.clone();
    let commands = service.commands.clone();
    let connections = service.connections.clone();
    let faults = Arc::new(faults);

    // The accept loop outlives the test body; the test process reaps it.
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            connections.fetch_add(1, Ordering::SeqCst);
            let (mode, commands, faults) = (mode.clone(), commands.clone(), faults.clone());
            std::thread::spawn(move || serve_faulty(stream, version, mode, commands, faults));
        }
    });

    service
}

fn serve_faulty(
    mut stream: TcpStream,
    version: u32,
    mode: Arc<Mutex<u32>>,
    commands: Arc<Mutex<Vec<u32>>>,
    faults: Arc<Vec<(usize, Fault)>>,
) {
    while let Ok(frame) = read_frame(&mut stream) {
        let Ok((request, _)) = Request::decode(&frame) else {
            return;
        };
        let index = {
            let mut commands = commands.lock().unwrap();
            commands.push(request.command);
            commands.len() - 1
        };
        let fault = faults
            .iter()
            .find(|(at, _)| *at == index)
            .map(|(_, fault)| *fault);

        if let Some(Fault::Stall(delay)) = fault {
            std::thread::sleep(delay);
        }
        let response = {
            let mut mode = mode.lock().unwrap();
            match request.command {
                CMD_GET_VERSION => Response::success_u32(version),
                CMD_GET_MODE => Response::success_u32(*mode),
                1..=4 => {
                    *mode = request.command;
                    Response::success(&[])
                }
                _ => Response::failure(0xf601),
            }
        };
        let encoded = response.encode();

        match fault {
            Some(Fault::HangUp) => return,
            Some(Fault::PartialReply) => {
                let _ = write_frame(&mut stream, &encoded[..encoded.len() / 2]);
                return;
            }
            _ => {
                if write_frame(&mut stream, &encoded).is_err() {
                    return;
                }
            }
        }
    }
}
