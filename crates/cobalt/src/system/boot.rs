//! High level emulation of the boot process.
//!
//! Instead of running the PIF boot ROM, the state it leaves behind is reproduced directly: the
//! cartridge boot code is copied into SP DMEM and registers are seeded with the values the boot
//! chip (CIC) variant of the cartridge would produce.
use crate::{image::Image, system::System};
use r4300::{
    Address,
    cop0::reg,
    cop1::{FCR0_VALUE, Fcr31},
};
use tracing::info;

/// Where execution starts after boot: the copy of the cartridge boot code in SP DMEM.
pub const ENTRY_POINT: u32 = 0xA400_0040;

/// Boot chip variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cic {
    Cic6101,
    Cic6102,
    Cic6103,
    Cic6105,
    Cic6106,
}

impl Cic {
    /// Identifies the boot chip from the sum of the words of the boot code.
    pub fn from_checksum(sum: u64) -> Self {
        match sum {
            0xD0_027F_DF31 | 0xCF_FB63_1223 => Self::Cic6101,
            0xD0_57C8_5244 => Self::Cic6102,
            0xD6_497E_414B => Self::Cic6103,
            0x11A_49F6_0E96 => Self::Cic6105,
            0xD6_D5BE_5580 => Self::Cic6106,
            _ => Self::Cic6102,
        }
    }
}

/// Whether the country code belongs to a PAL region.
fn is_pal(country_code: u8) -> bool {
    matches!(
        country_code,
        0x44 | 0x46 | 0x49 | 0x50 | 0x53 | 0x55 | 0x58 | 0x59
    )
}

impl System {
    /// Resets the CPU and loads `image`, leaving the system as the boot ROM would.
    pub fn boot(&mut self, image: &Image) {
        let data = image.data();
        self.bus.mem.rom = data.into();
        self.rom_digest = image.digest();

        self.bus.mem.sp[0x40..0xFFC].copy_from_slice(&data[0x40..0xFFC]);

        self.cpu = r4300::Cpu::default();
        self.mmu.clear();
        self.code.invalidate_all();
        self.stopped = false;
        self.legacy_beq_shim = false;

        let cpu = &mut self.cpu;
        cpu.cop1.fcr0 = FCR0_VALUE;
        cpu.cop1.fcr31 = Fcr31::default().to_bits();

        let gpr = &mut cpu.gpr;
        gpr[6] = 0xFFFF_FFFF_A400_1F0C;
        gpr[7] = 0xFFFF_FFFF_A400_1F08;
        gpr[8] = 0xC0;
        gpr[10] = 0x40;
        gpr[11] = 0xFFFF_FFFF_A400_0040;
        gpr[29] = 0xFFFF_FFFF_A400_1FF0;

        let cop0 = &mut cpu.cop0.regs;
        cop0[reg::RANDOM] = 31;
        cop0[reg::STATUS] = 0x3400_0000;
        cop0[reg::CONFIG] = 0x0006_E463;
        cop0[reg::PREV_ID] = 0xB00;
        cop0[reg::COUNT] = 0x5000;
        cop0[reg::CAUSE] = 0x5C;
        cop0[reg::CONTEXT] = 0x007F_FFF0;
        cop0[reg::EPC] = 0xFFFF_FFFF;
        cop0[reg::BAD_VADDR] = 0xFFFF_FFFF;
        cop0[reg::ERROR_EPC] = 0xFFFF_FFFF;

        let sum: u64 = self.bus.mem.dmem()[0x40..]
            .chunks_exact(4)
            .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]) as u64)
            .sum();
        let cic = Cic::from_checksum(sum);
        let pal = is_pal(image.country_code());
        info!(?cic, pal, checksum = format_args!("0x{sum:X}"), "booting cartridge");

        self.seed_region_registers(cic, pal);
        self.seed_cic_registers(cic);

        self.cpu.pc = Address(ENTRY_POINT);
        self.reset_events();
    }

    fn seed_region_registers(&mut self, cic: Cic, pal: bool) {
        let gpr = &mut self.cpu.gpr;
        if pal {
            match cic {
                Cic::Cic6102 => {
                    gpr[5] = 0xFFFF_FFFF_C0F1_D859;
                    gpr[14] = 0x2DE1_08EA;
                }
                Cic::Cic6103 => {
                    gpr[5] = 0xFFFF_FFFF_D464_6273;
                    gpr[14] = 0x1AF9_9984;
                }
                Cic::Cic6105 => {
                    gpr[5] = 0xFFFF_FFFF_DECA_AAD1;
                    gpr[14] = 0x0CF8_5C13;
                    gpr[24] = 2;
                    self.bus.mem.set_imem_word(1, 0xBDA8_07FC);
                }
                Cic::Cic6106 => {
                    gpr[5] = 0xFFFF_FFFF_B04D_C903;
                    gpr[14] = 0x1AF9_9984;
                    gpr[24] = 2;
                }
                Cic::Cic6101 => (),
            }

            self.cpu.gpr[23] = 6;
            self.cpu.gpr[31] = 0xFFFF_FFFF_A400_1554;
        } else {
            match cic {
                Cic::Cic6102 => {
                    gpr[5] = 0xFFFF_FFFF_C959_73D5;
                    gpr[14] = 0x2449_A366;
                }
                Cic::Cic6103 => {
                    gpr[5] = 0xFFFF_FFFF_9531_5A28;
                    gpr[14] = 0x5BAC_A1DF;
                }
                Cic::Cic6105 => {
                    gpr[5] = 0x5493_FB9A;
                    gpr[14] = 0xFFFF_FFFF_C2C2_0384;
                    self.bus.mem.set_imem_word(1, 0x8DA8_07FC);
                }
                Cic::Cic6106 => {
                    gpr[5] = 0xFFFF_FFFF_E067_221F;
                    gpr[14] = 0x5CD2_B70F;
                }
                Cic::Cic6101 => (),
            }

            self.cpu.gpr[20] = 1;
            self.cpu.gpr[24] = 3;
            self.cpu.gpr[31] = 0xFFFF_FFFF_A400_1550;
        }
    }

    fn seed_cic_registers(&mut self, cic: Cic) {
        let gpr = &mut self.cpu.gpr;
        match cic {
            Cic::Cic6101 => gpr[22] = 0x3F,
            Cic::Cic6102 => {
                gpr[1] = 1;
                gpr[2] = 0x0EBD_A536;
                gpr[3] = 0x0EBD_A536;
                gpr[4] = 0xA536;
                gpr[12] = 0xFFFF_FFFF_ED10_D0B3;
                gpr[13] = 0x1402_A4CC;
                gpr[15] = 0x3103_E121;
                gpr[22] = 0x3F;
                gpr[25] = 0xFFFF_FFFF_9DEB_B54F;
            }
            Cic::Cic6103 => {
                gpr[1] = 1;
                gpr[2] = 0x49A5_EE96;
                gpr[3] = 0x49A5_EE96;
                gpr[4] = 0xEE96;
                gpr[12] = 0xFFFF_FFFF_CE9D_FBF7;
                gpr[13] = 0xFFFF_FFFF_CE9D_FBF7;
                gpr[15] = 0x18B6_3D28;
                gpr[22] = 0x78;
                gpr[25] = 0xFFFF_FFFF_825B_21C9;
            }
            Cic::Cic6105 => {
                for (index, word) in [
                    (0, 0x3C0D_BFC0),
                    (2, 0x25AD_07C0),
                    (3, 0x3108_0080),
                    (4, 0x5500_FFFC),
                    (5, 0x3C0D_BFC0),
                    (6, 0x8DA8_0024),
                    (7, 0x3C0B_B000),
                ] {
                    self.bus.mem.set_imem_word(index, word);
                }

                gpr[2] = 0xFFFF_FFFF_F58B_0FBF;
                gpr[3] = 0xFFFF_FFFF_F58B_0FBF;
                gpr[4] = 0x0FBF;
                gpr[12] = 0xFFFF_FFFF_9651_F81E;
                gpr[13] = 0x2D42_AAC5;
                gpr[15] = 0x5658_4D60;
                gpr[22] = 0x91;
                gpr[25] = 0xFFFF_FFFF_CDCE_565F;
            }
            Cic::Cic6106 => {
                gpr[2] = 0xFFFF_FFFF_A959_30A4;
                gpr[3] = 0xFFFF_FFFF_A959_30A4;
                gpr[4] = 0x30A4;
                gpr[12] = 0xFFFF_FFFF_BCB5_9510;
                gpr[13] = 0xFFFF_FFFF_BCB5_9510;
                gpr[15] = 0x7A3C_07F4;
                gpr[22] = 0x85;
                gpr[25] = 0x465E_3F72;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::system::{Config, scheduler::Event};

    fn image(country: u8, boot_code: &[u32]) -> Image {
        let mut data = vec![0; 0x2000];
        data[..4].copy_from_slice(&[0x80, 0x37, 0x12, 0x40]);
        data[0x3E] = country;
        for (i, word) in boot_code.iter().enumerate() {
            data[0x40 + 4 * i..0x44 + 4 * i].copy_from_slice(&word.to_be_bytes());
        }

        Image::new(data).unwrap()
    }

    #[test]
    fn checksum_selects_cic() {
        assert_eq!(Cic::from_checksum(0xD6_497E_414B), Cic::Cic6103);
        assert_eq!(Cic::from_checksum(0xCF_FB63_1223), Cic::Cic6101);
        assert_eq!(Cic::from_checksum(0), Cic::Cic6102);
    }

    #[test]
    fn ntsc_6102_boot_state() {
        let mut sys = System::new(Config::default());
        sys.boot(&image(0x45, &[0x3C08_A400, 0x2508_0000]));

        let cpu = &sys.cpu;
        assert_eq!(cpu.pc, Address(ENTRY_POINT));
        assert_eq!(cpu.gpr[5], 0xFFFF_FFFF_C959_73D5);
        assert_eq!(cpu.gpr[20], 1);
        assert_eq!(cpu.gpr[22], 0x3F);
        assert_eq!(cpu.gpr[29], 0xFFFF_FFFF_A400_1FF0);
        assert_eq!(cpu.gpr[31], 0xFFFF_FFFF_A400_1550);
        assert_eq!(cpu.cop0.count(), 0x5000);
        assert_eq!(cpu.cop0.regs[reg::STATUS], 0x3400_0000);
        assert_eq!(cpu.cop1.fcr0, 0x511);

        assert_eq!(&sys.bus.mem.sp[0x40..0x48], &[0x3C, 0x08, 0xA4, 0x00, 0x25, 0x08, 0, 0]);
        assert!(sys.scheduler.contains(Event::Vi));
        assert!(sys.scheduler.contains(Event::Compare));
    }

    #[test]
    fn pal_region_registers() {
        let mut sys = System::new(Config::default());
        sys.boot(&image(0x50, &[]));
        assert_eq!(sys.cpu.gpr[5], 0xFFFF_FFFF_C0F1_D859);
        assert_eq!(sys.cpu.gpr[23], 6);
        assert_eq!(sys.cpu.gpr[20], 0);
        assert_eq!(sys.cpu.gpr[31], 0xFFFF_FFFF_A400_1554);
    }
}
