/*!
    per-axis motion control over the cyclic process image.

    [Axis] is a CiA402-flavoured state machine driven exclusively by the
    cyclic loop: the caller runs one [crate::Cyclic::exchange] per period then
    [Axis::poll]. `poll` reads the status word, advances the state machine and
    writes the next control word; it never issues frames of its own. All waits
    are cycle budgets, never sleeps, so they compose with the fixed period.
*/

#![allow(non_upper_case_globals)]

use core::fmt;
use bilge::prelude::*;
use crate::{
    data::{self, Field},
    error::{Error, Result},
    process::{Cyclic, ProcessLayout},
    };

/// process image of one servo drive, 16 bytes each way
pub const SERVO_LAYOUT: ProcessLayout = ProcessLayout {outputs: 16, inputs: 16};

/// fields of the servo output image
pub mod outputs {
    use super::*;

    pub const control: Field<ControlWord> = Field::simple(0);
    pub const mode: Field<OperationMode> = Field::simple(2);
    pub const target: Field<i32> = Field::simple(3);
    /// signed crawl speed in velocity mode, profile speed of a positioning move otherwise
    pub const velocity: Field<i32> = Field::simple(7);
}

/// fields of the servo input image
pub mod inputs {
    use super::*;

    pub const status: Field<StatusWord> = Field::simple(0);
    pub const mode: Field<OperationMode> = Field::simple(2);
    pub const position: Field<i32> = Field::simple(3);
}

/**
bit structure of a status word

| Bit   | Meaning |
|-------|---------|
| 0     | Ready to switch on |
| 1     | Switched on |
| 2     | Operation enabled |
| 3     | Fault |
| 4     | Voltage enabled |
| 5     | Quick stop |
| 6     | Switch on disabled |
| 7     | Warning |
| 10    | Target reached |
| 11    | Internal limit active |
| 12    | Operation mode specific (setpoint acknowledge / reference reached) |
| 15    | Axis homed |
*/
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq, Default)]
pub struct StatusWord {
    pub ready_switch_on: bool,
    pub switched_on: bool,
    pub operation_enabled: bool,
    pub fault: bool,
    pub voltage_enabled: bool,
    pub quick_stop: bool,
    pub switch_on_disabled: bool,
    pub warning: bool,
    reserved: u2,
    pub target_reached: bool,
    pub limit_active: bool,
    /// in position mode: the new setpoint was latched; in homing mode: the reference is reached
    pub ack: bool,
    reserved: u2,
    /// the axis holds a valid home reference
    pub homed: bool,
}
data::bilge_wiredata!(StatusWord, u16);

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "StatusWord{{")?;
        for (active, mark) in [
                (self.ready_switch_on(), "rtso"),
                (self.switched_on(), "so"),
                (self.operation_enabled(), "oe"),
                (self.fault(), "f"),
                (self.target_reached(), "tr"),
                (self.ack(), "ack"),
                (self.homed(), "h"),
                ] {
            write!(f, " ")?;
            if active {
                write!(f, "{}", mark)?;
            } else {
                for _ in 0 .. mark.len() {write!(f, " ")?;}
            }
        }
        write!(f, "}}")?;
        Ok(())
    }
}

/**
control word of a servo drive

| Bit   | Meaning |
|-------|---------|
| 0     | Switch on |
| 1     | Enable voltage |
| 2     | Quick stop (active low) |
| 3     | Enable operation |
| 4     | Operation mode specific (new setpoint / start homing) |
| 7     | Fault reset |
| 8     | Halt |
*/
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq, Default)]
pub struct ControlWord {
    pub switch_on: bool,
    pub enable_voltage: bool,
    pub quick_stop: bool,
    pub enable_operation: bool,
    /// in position mode: latch a new setpoint; in homing mode: start homing
    pub start: bool,
    reserved: u2,
    pub reset_fault: bool,
    pub halt: bool,
    reserved: u7,
}
data::bilge_wiredata!(ControlWord, u16);

impl ControlWord {
    /// all four enable bits raised, the drive powers its stage
    fn enabled() -> Self {
        let mut word = Self::default();
        word.set_switch_on(true);
        word.set_enable_voltage(true);
        word.set_quick_stop(true);
        word.set_enable_operation(true);
        word
    }
}

/// servo drive control-loop type
#[bitsize(8)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum OperationMode {
    #[fallback]
    #[default]
    Off = 0,
    ProfilePosition = 1,
    ProfileVelocity = 3,
    Homing = 6,
}
data::bilge_wiredata!(OperationMode, u8);

/// observable state of an [Axis]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AxisState {
    /// power stage off
    Disabled,
    /// enabled, no home reference yet
    Ready,
    /// homing in progress
    Homing,
    /// home reference acquired, idle
    Homed,
    /// moving toward a target position
    Positioning,
    /// last requested target reached, idle
    TargetReached,
    /// constant-velocity crawl
    Jogging,
    /// drive fault, leave through [Axis::reset_fault]
    Fault,
}

/// what the caller asked for, consumed by the polls
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Intent {
    None,
    Enable,
}

const DEFAULT_HOMING_BUDGET: u32 = 200;
const DEFAULT_POSITION_BUDGET: u32 = 10_000;
const DEFAULT_ENABLE_BUDGET: u32 = 50;

/**
    one motion axis mapped in the cyclic process image.

    The axis never talks to the wire: every method only edits the output
    image or inspects the input image of its device, and [Axis::poll] must be
    called once per exchanged cycle to make progress.
*/
pub struct Axis {
    position: u16,
    state: AxisState,
    intent: Intent,
    /// soft limits on the commanded position
    limits: (i32, i32),
    /// the axis acquired a home reference at some point
    homed: bool,
    /// last commanded target, base for relative moves
    commanded: i32,
    actual: i32,
    /// current level of the mode-specific start bit
    start_high: bool,
    /// the drive acknowledged the latest setpoint
    acked: bool,
    jog_velocity: i32,
    /// profile speed sent with positioning moves, 0 keeps the drive default
    profile_velocity: i32,
    budget_left: u32,
    homing_budget: u32,
    position_budget: u32,
    enable_budget: u32,
    disable_requested: bool,
    reset_requested: bool,
}

impl Axis {
    /// attach an axis to the device mapped at this chain position
    pub fn new(position: u16) -> Self {
        Self {
            position,
            state: AxisState::Disabled,
            intent: Intent::None,
            limits: (i32::MIN, i32::MAX),
            homed: false,
            commanded: 0,
            actual: 0,
            start_high: false,
            acked: false,
            jog_velocity: 0,
            profile_velocity: 0,
            budget_left: 0,
            homing_budget: DEFAULT_HOMING_BUDGET,
            position_budget: DEFAULT_POSITION_BUDGET,
            enable_budget: DEFAULT_ENABLE_BUDGET,
            disable_requested: false,
            reset_requested: false,
        }
    }

    /// soft limits applied to every commanded target
    pub fn set_limits(&mut self, min: i32, max: i32) {
        self.limits = (min, max);
    }
    /// cycles granted to a homing run before [Error::HomingTimeout]
    pub fn set_homing_budget(&mut self, cycles: u32) {
        self.homing_budget = cycles;
    }
    /// cycles granted to a positioning run
    pub fn set_position_budget(&mut self, cycles: u32) {
        self.position_budget = cycles;
    }
    /// profile speed of the following positioning moves, 0 keeps the drive default
    pub fn set_profile_velocity(&mut self, velocity: i32) {
        self.profile_velocity = velocity;
    }

    pub fn state(&self) -> AxisState {self.state}
    /// true while the drive reports a fault
    pub fn fault(&self) -> bool {self.state == AxisState::Fault}
    /// actual position read on the last poll
    pub fn actual(&self) -> i32 {self.actual}
    /// last commanded target position
    pub fn commanded(&self) -> i32 {self.commanded}

    /// power the drive stage on, completed over the following polls
    pub fn enable(&mut self) -> Result<()> {
        match self.state {
            AxisState::Disabled => {
                self.intent = Intent::Enable;
                self.budget_left = self.enable_budget;
                Ok(())
            }
            AxisState::Fault => Err(Error::Master("axis is faulted, reset it first")),
            // already enabled
            _ => Ok(()),
        }
    }

    /**
        start a homing run.

        A no-op while homing is already in progress. The run completes over
        the following polls, [Error::HomingTimeout] is raised when the homed
        bit does not show within the budget.
    */
    pub fn start_homing(&mut self) -> Result<()> {
        match self.state {
            AxisState::Homing => Ok(()),
            AxisState::Ready | AxisState::Homed | AxisState::TargetReached => {
                self.state = AxisState::Homing;
                self.start_high = false;
                self.budget_left = self.homing_budget;
                log::debug!("axis {}: homing started", self.position);
                Ok(())
            }
            _ => Err(Error::Master("axis must be enabled and idle to home")),
        }
    }

    /// move by `delta` relative to the last commanded target
    pub fn move_relative(&mut self, delta: i32) -> Result<()> {
        self.move_to(self.commanded.saturating_add(delta))
    }

    /// move to an absolute target position
    pub fn move_absolute(&mut self, target: i32) -> Result<()> {
        self.move_to(target)
    }

    fn move_to(&mut self, target: i32) -> Result<()> {
        if ! matches!(self.state, AxisState::Homed | AxisState::TargetReached) {
            return Err(Error::Master("axis must be homed and idle to move"));
        }
        let (min, max) = self.limits;
        if target < min || target > max {
            // the previous target stays commanded
            return Err(Error::OutOfRange {target, min, max});
        }
        self.commanded = target;
        self.state = AxisState::Positioning;
        self.start_high = false;
        self.acked = false;
        self.budget_left = self.position_budget;
        log::debug!("axis {}: moving to {}", self.position, target);
        Ok(())
    }

    /// crawl at a constant signed velocity until [Axis::jog_stop]
    pub fn jog(&mut self, velocity: i32) -> Result<()> {
        match self.state {
            AxisState::Ready | AxisState::Homed | AxisState::TargetReached | AxisState::Jogging => {
                self.jog_velocity = velocity;
                self.state = AxisState::Jogging;
                Ok(())
            }
            _ => Err(Error::Master("axis must be enabled and idle to jog")),
        }
    }

    /// stop a crawl, the axis returns to its idle state
    pub fn jog_stop(&mut self) -> Result<()> {
        if self.state != AxisState::Jogging {
            return Err(Error::Master("axis is not jogging"));
        }
        self.jog_velocity = 0;
        self.state = if self.homed {AxisState::Homed} else {AxisState::Ready};
        Ok(())
    }

    /// cooperative cancellation: the power stage drops on the next poll
    pub fn disable(&mut self) {
        self.disable_requested = true;
    }

    /// acknowledge a drive fault, the axis lands in [AxisState::Disabled]
    pub fn reset_fault(&mut self) -> Result<()> {
        if self.state != AxisState::Fault {
            return Err(Error::Master("axis is not faulted"));
        }
        self.reset_requested = true;
        Ok(())
    }

    /**
        advance the state machine by one cycle.

        Call once after each successful or lost exchange; on a lost cycle the
        outputs are simply re-sent unchanged, holding the last command.
    */
    pub fn poll(&mut self, cyclic: &mut Cyclic<'_>) -> Result<AxisState> {
        let status = cyclic.get(self.position, inputs::status);
        self.actual = cyclic.get(self.position, inputs::position);
        if ! matches!(self.state, AxisState::Positioning | AxisState::TargetReached) {
            self.commanded = self.actual;
        }

        // fault handling precedes everything else
        if self.reset_requested {
            let mut control = ControlWord::default();
            control.set_reset_fault(true);
            cyclic.set(self.position, outputs::control, control);
            cyclic.set(self.position, outputs::mode, OperationMode::Off);
            if ! status.fault() {
                self.reset_requested = false;
                self.disable_requested = false;
                self.intent = Intent::None;
                self.homed = false;
                self.start_high = false;
                self.state = AxisState::Disabled;
                log::debug!("axis {}: fault cleared", self.position);
            }
            return Ok(self.state);
        }
        if status.fault() {
            if self.state != AxisState::Fault {
                log::warn!("axis {}: drive fault", self.position);
            }
            self.state = AxisState::Fault;
            self.intent = Intent::None;
            self.start_high = false;
            cyclic.set(self.position, outputs::control, ControlWord::default());
            return Ok(self.state);
        }
        if self.disable_requested {
            self.disable_requested = false;
            self.intent = Intent::None;
            self.start_high = false;
            self.state = AxisState::Disabled;
            cyclic.set(self.position, outputs::control, ControlWord::default());
            cyclic.set(self.position, outputs::mode, OperationMode::Off);
            log::debug!("axis {}: disabled", self.position);
            return Ok(self.state);
        }

        match self.state {
            AxisState::Disabled => {
                if self.intent == Intent::Enable {
                    cyclic.set(self.position, outputs::control, ControlWord::enabled());
                    cyclic.set(self.position, outputs::mode, OperationMode::Off);
                    if status.operation_enabled() {
                        self.intent = Intent::None;
                        self.state = if self.homed {AxisState::Homed} else {AxisState::Ready};
                    }
                    else if self.budget_left == 0 {
                        self.intent = Intent::None;
                        return Err(Error::Timeout("drive did not enable within the cycle budget"));
                    }
                    else {
                        self.budget_left -= 1;
                    }
                }
                else {
                    cyclic.set(self.position, outputs::control, ControlWord::default());
                }
            }
            AxisState::Homing => {
                cyclic.set(self.position, outputs::mode, OperationMode::Homing);
                let mut control = ControlWord::enabled();
                // homed is only meaningful once the drive has seen our start edge
                if self.start_high && status.homed() {
                    self.start_high = false;
                    self.homed = true;
                    self.state = AxisState::Homed;
                    cyclic.set(self.position, outputs::control, control);
                    log::debug!("axis {}: homed", self.position);
                    return Ok(self.state);
                }
                if self.budget_left == 0 {
                    self.start_high = false;
                    self.state = if self.homed {AxisState::Homed} else {AxisState::Ready};
                    cyclic.set(self.position, outputs::control, control);
                    return Err(Error::HomingTimeout(self.homing_budget));
                }
                self.budget_left -= 1;
                control.set_start(true);
                self.start_high = true;
                cyclic.set(self.position, outputs::control, control);
            }
            AxisState::Positioning => {
                cyclic.set(self.position, outputs::mode, OperationMode::ProfilePosition);
                cyclic.set(self.position, outputs::target, self.commanded);
                cyclic.set(self.position, outputs::velocity, self.profile_velocity);
                let mut control = ControlWord::enabled();
                if ! self.acked {
                    if self.start_high && status.ack() {
                        // setpoint latched, release the start bit
                        self.acked = true;
                        self.start_high = false;
                    }
                    else {
                        control.set_start(true);
                        self.start_high = true;
                    }
                }
                else if status.target_reached() {
                    self.state = AxisState::TargetReached;
                    log::debug!("axis {}: target reached at {}", self.position, self.actual);
                }
                if self.state == AxisState::Positioning {
                    if self.budget_left == 0 {
                        cyclic.set(self.position, outputs::control, ControlWord::enabled());
                        return Err(Error::Timeout("positioning exhausted its cycle budget"));
                    }
                    self.budget_left -= 1;
                }
                cyclic.set(self.position, outputs::control, control);
            }
            AxisState::Jogging => {
                cyclic.set(self.position, outputs::mode, OperationMode::ProfileVelocity);
                cyclic.set(self.position, outputs::velocity, self.jog_velocity);
                cyclic.set(self.position, outputs::control, ControlWord::enabled());
            }
            AxisState::Ready | AxisState::Homed | AxisState::TargetReached => {
                cyclic.set(self.position, outputs::mode, OperationMode::Off);
                cyclic.set(self.position, outputs::control, ControlWord::enabled());
            }
            AxisState::Fault => {
                // unreachable, handled above
                cyclic.set(self.position, outputs::control, ControlWord::default());
            }
        }
        Ok(self.state)
    }
}
