//! Alarm and status information (command 0x44).

use crate::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const TEMPERATURE_STATES: usize = 6;

macro_rules! read_bit {
    ($bits:expr,$position:expr) => {
        ($bits >> $position) & 1 != 0
    };
}

macro_rules! status_flags {
    ($(#[$meta:meta])* $name:ident: $repr:ty { $($variant:ident = $bit:expr => $label:expr,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            /// Flags set in `bits`, in display order.
            pub fn active(bits: $repr) -> Vec<Self> {
                let mut result = Vec::new();
                $(
                    if read_bit!(bits, $bit) {
                        result.push($name::$variant);
                    }
                )+
                result
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let label = match self {
                    $($name::$variant => $label,)+
                };
                f.write_str(label)
            }
        }
    };
}

status_flags! {
    /// Protection flags. Bits 0-7 come from protect status 2, bits 8-15 from protect status 1.
    Protection: u16 {
        ChargeOverTemperature = 0 => "CHG_OTP",
        ChargeUnderTemperature = 1 => "CHG_UTP",
        DischargeOverTemperature = 2 => "DSG_OTP",
        DischargeUnderTemperature = 3 => "DSG_UTP",
        ChargeOverCurrent = 4 => "CHG_OCP",
        DischargeOverCurrent = 5 => "DSG_OCP",
        CellOverVoltage = 6 => "Cell_OVP",
        CellUnderVoltage = 7 => "Cell_UVP",
        PackOverVoltage = 14 => "Pack_OVP",
        PackUnderVoltage = 15 => "Pack_UVP",
        MosOverTemperature = 10 => "MOS_OTP",
        EnvironmentOverTemperature = 12 => "ENV_OTP",
        EnvironmentUnderTemperature = 13 => "ENV_UTP",
        ChargerOverVoltage = 11 => "Charger_OVP",
        ShortCircuit = 8 => "SCP",
    }
}

status_flags! {
    SystemFlag: u8 {
        ChargeMos = 0 => "Charge_MOS",
        DischargeMos = 1 => "Discharge_MOS",
        ChargeLimit = 2 => "Charge_Limit",
        Heater = 3 => "Heater",
        FullyCharged = 4 => "Fully_Charged",
        AcIn = 5 => "AC_in",
    }
}

status_flags! {
    Fault: u8 {
        ChargeMos = 0 => "CHG_MOS_Fault",
        DischargeMos = 1 => "DSG_MOS_Fault",
        Ntc = 2 => "NTC_Fault",
        Cell = 3 => "Cell_Fault",
        Sampling = 4 => "Sampling_Fault",
        Ccb = 5 => "CCB_Fault",
        Heater = 6 => "Heater_Fault",
    }
}

status_flags! {
    Alarm: u16 {
        ChargeOverTemperature = 0 => "CHG_OT",
        ChargeUnderTemperature = 1 => "CHG_UT",
        DischargeOverTemperature = 2 => "DSG_OT",
        DischargeUnderTemperature = 3 => "DSG_UT",
        ChargeOverCurrent = 4 => "CHG_OC",
        DischargeOverCurrent = 5 => "DSG_OC",
        CellOverVoltage = 6 => "Cell_OV",
        CellUnderVoltage = 7 => "Cell_UV",
        PackOverVoltage = 8 => "Pack_OV",
        PackUnderVoltage = 9 => "Pack_UV",
        SocLow = 10 => "SOC_Low",
        MosOverTemperature = 11 => "MOS_OT",
        EnvironmentOverTemperature = 12 => "ENV_OT",
        EnvironmentUnderTemperature = 13 => "ENV_UT",
    }
}

/// Comma separated flag names, or "Normal" when none is set.
pub fn render<T: fmt::Display>(flags: &[T]) -> String {
    if flags.is_empty() {
        return "Normal".to_string();
    }
    flags
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Raw alarm information of one pack.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlarmStatus {
    pub modules: u8,
    pub cell_states: Vec<u8>,
    pub temperature_states: Vec<u8>,
    pub current_state: u8,
    pub voltage_state: u8,
    pub protect_status_1: u8,
    pub protect_status_2: u8,
    pub system_status: u8,
    pub fault_status: u8,
    pub alarm_status: u16,
    /// Not sent by every firmware, 0 when missing.
    pub component_status: u8,
}

/// The four flag groups rendered for display.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlarmSummary {
    pub protect: String,
    pub system: String,
    pub fault: String,
    pub alarm: String,
}

fn take<'a>(data: &'a [u8], idx: &mut usize, len: usize) -> Result<&'a [u8], Error> {
    let bytes = data.get(*idx..*idx + len).ok_or(Error::BoundsFailure {
        offset: *idx,
        len,
        available: data.len(),
    })?;
    *idx += len;
    Ok(bytes)
}

impl AlarmStatus {
    /// Decodes the alarm block following the pack id prefix.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, Error> {
        let mut idx = 0;
        let modules = take(data, &mut idx, 1)?[0];
        let cells = take(data, &mut idx, 1)?[0];
        let cell_states = take(data, &mut idx, usize::from(cells))?.to_vec();
        let temperature_states = take(data, &mut idx, TEMPERATURE_STATES)?.to_vec();
        let states = take(data, &mut idx, 6)?;
        // two unused bytes precede the alarm status
        let skipped = take(data, &mut idx, 2)?;
        let alarm = take(data, &mut idx, 2)?;
        let component_status = data.get(idx).copied().unwrap_or(0);

        let status = Self {
            modules,
            cell_states,
            temperature_states,
            current_state: states[0],
            voltage_state: states[1],
            protect_status_1: states[2],
            protect_status_2: states[3],
            system_status: states[4],
            fault_status: states[5],
            alarm_status: u16::from_be_bytes([alarm[0], alarm[1]]),
            component_status,
        };
        log::trace!(
            "Alarm bytes - protect_sts1={:#04x} protect_sts2={:#04x} system_sts={:#04x} fault_sts={:#04x} skipped={} alarm_sts={:#06x}",
            status.protect_status_1,
            status.protect_status_2,
            status.system_status,
            status.fault_status,
            hex::encode(skipped),
            status.alarm_status
        );
        Ok(status)
    }

    pub fn protections(&self) -> Vec<Protection> {
        Protection::active(u16::from_be_bytes([
            self.protect_status_1,
            self.protect_status_2,
        ]))
    }

    pub fn system_flags(&self) -> Vec<SystemFlag> {
        SystemFlag::active(self.system_status)
    }

    pub fn faults(&self) -> Vec<Fault> {
        Fault::active(self.fault_status)
    }

    pub fn alarms(&self) -> Vec<Alarm> {
        Alarm::active(self.alarm_status)
    }

    pub fn summary(&self) -> AlarmSummary {
        AlarmSummary {
            protect: render(&self.protections()),
            system: render(&self.system_flags()),
            fault: render(&self.faults()),
            alarm: render(&self.alarms()),
        }
    }
}

impl fmt::Display for AlarmSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "protect: {}; system: {}; fault: {}; alarm: {}",
            self.protect, self.system, self.fault, self.alarm
        )
    }
}
