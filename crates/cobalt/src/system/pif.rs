//! Joybus commands exchanged through PIF RAM.
use crate::system::{System, mem::PIF_RAM_LEN};
use strum::FromRepr;
use tracing::{debug, trace};

/// Number of controller ports.
pub const CONTROLLERS: usize = 4;

/// Error bit of the receive length byte: no device answered.
const NO_DEVICE: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
enum Command {
    Info = 0x00,
    ReadButtons = 0x01,
    Reset = 0xFF,
}

impl System {
    /// Runs the commands in PIF RAM, writing responses in place.
    pub fn process_pif_commands(&mut self) {
        let mut channel = 0;
        let mut i = 0;

        while i < PIF_RAM_LEN - 1 {
            match self.bus.mem.pif_ram[i] {
                0x00 => {
                    channel += 1;
                    i += 1;
                }
                0xFD | 0xFF => i += 1,
                0xFE => break,
                tx => {
                    let tx = (tx & 0x3F) as usize;
                    let Some(&rx) = self.bus.mem.pif_ram.get(i + 1) else {
                        break;
                    };

                    let rx = (rx & 0x3F) as usize;
                    if i + 2 + tx + rx > PIF_RAM_LEN {
                        debug!("pif command at {i} overruns PIF RAM");
                        break;
                    }

                    self.process_joybus(channel, i, tx);
                    i += 2 + tx + rx;
                    channel += 1;
                }
            }
        }
    }

    /// Answers the command at `pif_ram[start + 2..]` on `channel`.
    fn process_joybus(&mut self, channel: usize, start: usize, tx: usize) {
        let ram = &mut self.bus.mem.pif_ram;
        let command = ram[start + 2];
        let response = start + 2 + tx;

        trace!(channel, command, "joybus command");
        if channel >= CONTROLLERS {
            ram[start + 1] |= NO_DEVICE;
            return;
        }

        match Command::from_repr(command) {
            Some(Command::Info | Command::Reset) => {
                ram[response..response + 3].copy_from_slice(&[0x05, 0x00, 0x01]);
            }
            Some(Command::ReadButtons) => {
                let input = self.vcr.poll_input(channel);
                ram[response..response + 4].copy_from_slice(&input.to_be_bytes());
            }
            None => {
                debug!(channel, command, "unsupported joybus command");
                ram[start + 1] |= NO_DEVICE;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{system::Config, vcr::Vcr};

    struct Fixed;

    impl Vcr for Fixed {
        fn poll_input(&mut self, controller: usize) -> u32 {
            0x1000_0000 | controller as u32
        }
    }

    #[test]
    fn controller_commands_are_answered() {
        let mut sys = System::new(Config::default());
        sys.vcr = Box::new(Fixed);

        let commands = [
            0xFF, 0x01, 0x03, 0x00, 0xFF, 0xFF, 0xFF, // channel 0: info
            0x01, 0x04, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, // channel 1: read buttons
            0x01, 0x04, 0x02, 0x00, 0x00, 0x00, 0x00, // channel 2: unknown command
            0xFE,
        ];
        sys.bus.mem.pif_ram[..commands.len()].copy_from_slice(&commands);
        sys.process_pif_commands();

        let ram = &sys.bus.mem.pif_ram;
        // leading 0xFF is padding, so the info command starts at index 1
        assert_eq!(&ram[1..7], &[0x01, 0x03, 0x00, 0x05, 0x00, 0x01]);
        assert_eq!(&ram[7..14], &[0x01, 0x04, 0x01, 0x10, 0x00, 0x00, 0x01]);
        assert_eq!(ram[15], 0x84);
    }

    #[test]
    fn skipped_channels_and_missing_ports() {
        let mut sys = System::new(Config::default());
        let commands = [0x00, 0x00, 0x00, 0x00, 0x01, 0x04, 0x01, 0, 0, 0, 0, 0xFE];
        sys.bus.mem.pif_ram[..commands.len()].copy_from_slice(&commands);
        sys.process_pif_commands();
        assert_eq!(sys.bus.mem.pif_ram[5], 0x84);
    }
}
