//! USB CDC-ACM (Communications Device Class, Abstract Control Model)
//!
//! A port is a pair of interfaces: a communications interface carrying the
//! class requests and an interrupt endpoint, plus a data interface with the
//! bulk endpoints. Composite devices group the pairs with Interface
//! Association Descriptors, which are preferred over counting interfaces.
//! Devices without any pair get a single port numbered -1 that uses
//! interface 0 for everything.

use crate::driver::{DriverFactory, DriverKind, SerialDriver};
use crate::port::{ChipsetPort, PortContext, PortEndpoints};
use common::{Error, Result, UsbDevice, UsbInterface};
use protocol::cdc;
use protocol::descriptors::{
    USB_CLASS_CDC_DATA, USB_CLASS_COMM, USB_SUBCLASS_ACM, acm_first_interface, split_descriptors,
};
use protocol::hexdump::to_hex_string;
use protocol::{ControlLine, ControlLines, LineSettings};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

pub struct CdcAcmFactory;

impl DriverFactory for CdcAcmFactory {
    fn kind(&self) -> DriverKind {
        DriverKind::CdcAcm
    }

    fn supported_devices(&self) -> &'static [(u16, &'static [u16])] {
        &[]
    }

    fn probe(&self, device: &UsbDevice) -> bool {
        count_acm_ports(device) > 0
    }

    fn create(&self, device: UsbDevice) -> Arc<SerialDriver> {
        let ports = match count_acm_ports(&device) {
            0 => vec![-1],
            n => (0..n as i32).collect(),
        };
        SerialDriver::build(DriverKind::CdcAcm, device, ports, |_, _| {
            Box::new(CdcAcmPort::default())
        })
    }
}

fn is_control_interface(interface: &UsbInterface) -> bool {
    interface.class == USB_CLASS_COMM && interface.subclass == USB_SUBCLASS_ACM
}

fn is_data_interface(interface: &UsbInterface) -> bool {
    interface.class == USB_CLASS_CDC_DATA
}

/// Number of complete control/data interface pairs
pub fn count_acm_ports(device: &UsbDevice) -> usize {
    let controls = device
        .interfaces
        .iter()
        .filter(|i| is_control_interface(i))
        .count();
    let data = device
        .interfaces
        .iter()
        .filter(|i| is_data_interface(i))
        .count();
    controls.min(data)
}

/// Interfaces resolved at open
#[derive(Debug, Default)]
struct AcmInterfaces {
    control: Option<UsbInterface>,
    data: Option<UsbInterface>,
}

#[derive(Default)]
struct CdcAcmState {
    interfaces: AcmInterfaces,
    /// wIndex of class requests
    control_index: u16,
    dtr: bool,
    rts: bool,
}

#[derive(Default)]
struct CdcAcmPort {
    state: Mutex<CdcAcmState>,
}

impl CdcAcmPort {
    fn state(&self) -> MutexGuard<'_, CdcAcmState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_acm_control_message(
        &self,
        ctx: &PortContext<'_>,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> Result<()> {
        let index = self.state().control_index;
        ctx.control_out(cdc::REQUEST_TYPE, request, value, index, data)
            .map_err(|e| Error::Io(format!("controlTransfer failed: {}", e)))
    }

    fn send_control_line_state(&self, ctx: &PortContext<'_>, dtr: bool, rts: bool) -> Result<()> {
        self.send_acm_control_message(
            ctx,
            cdc::SET_CONTROL_LINE_STATE,
            cdc::control_line_state(dtr, rts),
            &[],
        )
    }

    /// Interface 0 shared for control and data
    fn open_single_interface(&self, ctx: &PortContext<'_>) -> Result<PortEndpoints> {
        debug!("device might be castrated ACM device, trying single interface logic");
        let interface = ctx
            .interface(0)
            .map_err(|_| Error::Io("No control interface".to_string()))?;
        ctx.connection
            .claim_interface(interface, true)
            .map_err(|e| Error::Io(format!("Could not claim shared control/data interface: {}", e)))?;

        {
            let mut state = self.state();
            state.control_index = 0;
            state.interfaces = AcmInterfaces {
                control: Some(interface.clone()),
                data: Some(interface.clone()),
            };
        }

        let mut endpoints = PortEndpoints::default();
        let mut control_endpoint = None;
        for ep in &interface.endpoints {
            if ep.is_interrupt_in() {
                control_endpoint = Some(ep);
            } else if ep.is_bulk_in() {
                endpoints.read = Some(ep.clone());
            } else if ep.is_bulk_out() {
                endpoints.write = Some(ep.clone());
            }
        }
        if control_endpoint.is_none() {
            return Err(Error::Io("No control endpoint".to_string()));
        }
        Ok(endpoints)
    }

    /// First interface of this port's function from the IADs, if any
    fn interface_id_from_descriptors(ctx: &PortContext<'_>) -> Option<u8> {
        let raw = match ctx.connection.raw_descriptors() {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Could not read raw descriptors: {}", e);
                return None;
            }
        };
        let descriptors = split_descriptors(&raw);
        for descriptor in &descriptors {
            trace!("USB descriptor: {}", to_hex_string(descriptor));
        }
        acm_first_interface(&descriptors, ctx.port_index())
    }

    fn resolve_interfaces(ctx: &PortContext<'_>) -> AcmInterfaces {
        let mut found = AcmInterfaces::default();

        if let Some(first) = Self::interface_id_from_descriptors(ctx) {
            debug!(
                "interface count={}, IAD={}",
                ctx.device.interface_count(),
                first
            );
            for interface in &ctx.device.interfaces {
                if interface.id != first && interface.id != first.wrapping_add(1) {
                    continue;
                }
                if is_control_interface(interface) {
                    found.control = Some(interface.clone());
                }
                if is_data_interface(interface) {
                    found.data = Some(interface.clone());
                }
            }
        }

        if found.control.is_none() || found.data.is_none() {
            debug!("no IAD fallback");
            let mut controls = 0;
            let mut datas = 0;
            for interface in &ctx.device.interfaces {
                if is_control_interface(interface) {
                    if controls == ctx.port_index() {
                        found.control = Some(interface.clone());
                    }
                    controls += 1;
                }
                if is_data_interface(interface) {
                    if datas == ctx.port_index() {
                        found.data = Some(interface.clone());
                    }
                    datas += 1;
                }
            }
        }
        found
    }

    fn open_interface_pair(&self, ctx: &PortContext<'_>) -> Result<PortEndpoints> {
        let found = Self::resolve_interfaces(ctx);

        let control = found
            .control
            .clone()
            .ok_or_else(|| Error::Io("No control interface".to_string()))?;
        debug!("Control interface id {}", control.id);
        {
            let mut state = self.state();
            state.control_index = control.id as u16;
            state.interfaces = AcmInterfaces {
                control: Some(control.clone()),
                data: None,
            };
        }
        ctx.connection
            .claim_interface(&control, true)
            .map_err(|e| Error::Io(format!("Could not claim control interface: {}", e)))?;
        match control.endpoint(0) {
            Some(ep) if ep.is_interrupt_in() => {}
            _ => return Err(Error::Io("Invalid control endpoint".to_string())),
        }

        let data = found
            .data
            .ok_or_else(|| Error::Io("No data interface".to_string()))?;
        debug!("data interface id {}", data.id);
        self.state().interfaces.data = Some(data.clone());
        ctx.connection
            .claim_interface(&data, true)
            .map_err(|e| Error::Io(format!("Could not claim data interface: {}", e)))?;

        Ok(PortEndpoints::bulk(&data))
    }
}

impl ChipsetPort for CdcAcmPort {
    fn name(&self) -> &'static str {
        "CdcAcmSerialPort"
    }

    fn open_interfaces(&self, ctx: &PortContext<'_>) -> Result<PortEndpoints> {
        for interface in &ctx.device.interfaces {
            trace!("interface {:?}", interface);
        }
        if ctx.port_number == -1 {
            self.open_single_interface(ctx)
        } else {
            debug!("trying default interface logic");
            self.open_interface_pair(ctx)
        }
    }

    fn close_interfaces(&self, ctx: &PortContext<'_>) -> Result<()> {
        let interfaces = std::mem::take(&mut self.state().interfaces);
        if let Some(control) = &interfaces.control {
            ctx.release(control)?;
        }
        if let Some(data) = &interfaces.data
            && interfaces.control.as_ref().map(|c| c.id) != Some(data.id)
        {
            ctx.release(data)?;
        }
        Ok(())
    }

    fn set_parameters(&self, ctx: &PortContext<'_>, settings: &LineSettings) -> Result<()> {
        let line_coding = cdc::encode_line_coding(settings);
        self.send_acm_control_message(ctx, cdc::SET_LINE_CODING, 0, &line_coding)
    }

    fn supported_control_lines(&self) -> ControlLines {
        ControlLines::OUTPUTS
    }

    fn output_lines(&self) -> ControlLines {
        let state = self.state();
        let mut lines = ControlLines::EMPTY;
        lines.set(ControlLine::Dtr, state.dtr);
        lines.set(ControlLine::Rts, state.rts);
        lines
    }

    fn set_output_line(&self, ctx: &PortContext<'_>, line: ControlLine, value: bool) -> Result<()> {
        let (mut dtr, mut rts) = {
            let state = self.state();
            (state.dtr, state.rts)
        };
        match line {
            ControlLine::Dtr => dtr = value,
            ControlLine::Rts => rts = value,
            _ => return Err(Error::InvalidArgument(format!("{} is an input line", line))),
        }
        self.send_control_line_state(ctx, dtr, rts)?;
        let mut state = self.state();
        state.dtr = dtr;
        state.rts = rts;
        Ok(())
    }

    fn set_break(&self, ctx: &PortContext<'_>, value: bool) -> Result<()> {
        self.send_acm_control_message(ctx, cdc::SEND_BREAK, cdc::break_value(value), &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{bulk_interface, cdc_data_interface, create_mock_device, mock_cdc_acm_device};

    #[test]
    fn test_count_acm_ports() {
        assert_eq!(count_acm_ports(&mock_cdc_acm_device(0x2341, 0x0043, 2)), 2);

        let unpaired = create_mock_device(0x1234, 0x5678, vec![cdc_data_interface(0)]);
        assert_eq!(count_acm_ports(&unpaired), 0);

        let vendor = create_mock_device(0x1234, 0x5678, vec![bulk_interface(0, 0xff, 64)]);
        assert_eq!(count_acm_ports(&vendor), 0);
    }
}
