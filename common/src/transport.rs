use log::warn;

use crate::{error::TransportError, pulse::PulseSequence};

/// Outbound infrared link. Sends are fire-and-forget: there is no
/// acknowledgement and implementations never retry.
pub trait Transport {
    fn send(&mut self, sequence: &PulseSequence) -> Result<(), TransportError>;

    fn is_enabled(&self) -> bool {
        true
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, sequence: &PulseSequence) -> Result<(), TransportError> {
        (**self).send(sequence)
    }

    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }
}

/// Stand-in used when no IR hardware could be initialised. Every send fails
/// as unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTransport;

impl Transport for DisabledTransport {
    fn send(&mut self, sequence: &PulseSequence) -> Result<(), TransportError> {
        warn!(
            "IR disabled, dropping frame with {} timings",
            sequence.len()
        );
        Err(TransportError::Unavailable(
            "IR transmitter not initialised".to_string(),
        ))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn disabled_transport_refuses_frames() {
        let mut transport: Box<dyn Transport> = Box::new(DisabledTransport);
        let sequence = PulseSequence::from_timings(38_000, &[400, -975, 400]);

        assert!(!transport.is_enabled());
        assert_eq!(
            transport.send(&sequence),
            Err(TransportError::Unavailable(
                "IR transmitter not initialised".to_string()
            ))
        );
    }
}
