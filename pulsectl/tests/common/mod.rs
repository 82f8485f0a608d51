use pulse_mainloop::Mainloop;
use pulse_transport::{MockServer, MockTransport};
use pulsectl::Pulse;

/// A client plus the in-memory server it talks to
pub fn unconnected_pulse() -> (MockServer, Pulse) {
    let mainloop = Mainloop::new().unwrap();
    let server = MockServer::with_defaults();
    let transport = MockTransport::new(&server, mainloop.api());
    let pulse = Pulse::new("pulsectl-tests", None, mainloop, Box::new(transport));
    (server, pulse)
}

pub fn connected_pulse() -> (MockServer, Pulse) {
    let (server, pulse) = unconnected_pulse();
    pulse.connect(false, false, None).unwrap();
    (server, pulse)
}
