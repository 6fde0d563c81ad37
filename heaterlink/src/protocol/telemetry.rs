//! Parsing of free-form telemetry lines.
//!
//! The firmware streams status lines with labelled fields in no fixed order,
//! e.g. `ETmp: 142.5 Fan%: 60 FHZ 2.2 St: 0`. Fields are extracted with
//! per-label patterns so a line may populate any subset of the frame; values
//! are kept as the raw tokens the firmware printed.

use std::sync::LazyLock;

use regex::Regex;

/// Heater power level reported in the `St:` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerState {
    /// Full power (St: 0).
    Full,
    /// Medium power (St: 1).
    Mid,
    /// Low power (St: 2).
    Low,
}

impl PowerState {
    /// Map the raw `St:` code to a power level.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "0" => Some(Self::Full),
            "1" => Some(Self::Mid),
            "2" => Some(Self::Low),
            _ => None,
        }
    }

    /// Human-readable label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Mid => "MID",
            Self::Low => "LOW",
        }
    }
}

macro_rules! field_pattern {
    ($name:ident, $pattern:literal) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($pattern).expect("hand-written pattern must compile"));
    };
}

field_pattern!(RE_FAULT, r"F:\s*(\S+)");
field_pattern!(RE_IGN_FAILS, r"IgnF#:\s*(\S+)");
field_pattern!(RE_EXHAUST_TEMP, r"ETmp:\s*(\S+)");
field_pattern!(RE_FAN_PCT, r"Fan%:\s*(\S+)");
field_pattern!(RE_PUMP_HZ, r"FHZ\s*(\S+)");
field_pattern!(RE_FAN_RPM, r"FN:\s*(\S+)");
field_pattern!(RE_GLOW, r"Gl:\s*(\S+)");
field_pattern!(RE_CYCLE_TIME, r"CyTim:\s*(\S+)");
field_pattern!(RE_INFO, r"I:\s*(\S+)");
field_pattern!(RE_FINAL_FUEL, r"FinalFuel:\s*(\S+\s+\S+)");
field_pattern!(RE_BURN, r"Burn:\s*(\S+)");
field_pattern!(RE_POWER, r"St:\s*(\S+)");

/// One telemetry line decoded into labelled fields.
///
/// Every field is optional; a single line rarely carries all of them. Values
/// are the firmware's raw tokens, not converted to numbers, since units and
/// formats vary between firmware builds.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetryFrame {
    /// Fault code (`F:`).
    pub fault: Option<String>,
    /// Ignition failure count (`IgnF#:`).
    pub ignition_failures: Option<String>,
    /// Exhaust temperature (`ETmp:`).
    pub exhaust_temp: Option<String>,
    /// Fan duty cycle percent (`Fan%:`).
    pub fan_percent: Option<String>,
    /// Fuel pump frequency in Hz (`FHZ`).
    pub pump_hz: Option<String>,
    /// Fan speed (`FN:`).
    pub fan_speed: Option<String>,
    /// Glow plug state (`Gl:`).
    pub glow_plug: Option<String>,
    /// Current cycle time (`CyTim:`).
    pub cycle_time: Option<String>,
    /// Controller state info (`I:`).
    pub info: Option<String>,
    /// Final fuel rate with unit (`FinalFuel:`, two tokens).
    pub final_fuel: Option<String>,
    /// Burn state (`Burn:`).
    pub burn: Option<String>,
    /// Power level (`St:` 0/1/2).
    pub power: Option<PowerState>,
}

impl TelemetryFrame {
    /// Extract all recognized fields from one line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let capture = |re: &Regex| {
            re.captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        };

        Self {
            fault: capture(&RE_FAULT),
            ignition_failures: capture(&RE_IGN_FAILS),
            exhaust_temp: capture(&RE_EXHAUST_TEMP),
            fan_percent: capture(&RE_FAN_PCT),
            pump_hz: capture(&RE_PUMP_HZ),
            fan_speed: capture(&RE_FAN_RPM),
            glow_plug: capture(&RE_GLOW),
            cycle_time: capture(&RE_CYCLE_TIME),
            info: capture(&RE_INFO),
            final_fuel: capture(&RE_FINAL_FUEL),
            burn: capture(&RE_BURN),
            power: capture(&RE_POWER).and_then(|c| PowerState::from_code(&c)),
        }
    }

    /// Whether the line carried no recognized field at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
