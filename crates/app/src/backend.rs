use crate::audio::{CpalInput, CpalOutput};
use crate::channel::WsChannel;
use atlasvoice_core::error::{ChannelError, DeviceError};
use atlasvoice_core::protocol::SetupMessage;
use atlasvoice_core::{
    Backend, EventSender, InputDevice, OutputDevice, SessionChannel, StateWatch,
};

/// Real devices through cpal and the service over a WebSocket.
pub struct LiveBackend {
    pub input_name: String,
    pub output_name: String,
    pub url: String,
    pub block_size: usize,
}

impl Backend for LiveBackend {
    fn acquire_output(&mut self, events: EventSender) -> Result<Box<dyn OutputDevice>, DeviceError> {
        Ok(Box::new(CpalOutput::acquire(&self.output_name, events)?))
    }

    fn acquire_input(
        &mut self,
        events: EventSender,
        state: StateWatch,
    ) -> Result<Box<dyn InputDevice>, DeviceError> {
        Ok(Box::new(CpalInput::acquire(
            &self.input_name,
            self.block_size,
            events,
            state,
        )?))
    }

    fn connect(
        &mut self,
        setup: &SetupMessage,
        events: EventSender,
    ) -> Result<Box<dyn SessionChannel>, ChannelError> {
        Ok(Box::new(WsChannel::connect(self.url.clone(), setup, events)?))
    }
}
