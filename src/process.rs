/*!
    cyclic process-data exchange over the logical memory.

    [ProcessMap] describes where each device's images live in the logical
    memory, as negotiated by [crate::session::Session::configure_images].
    [Cyclic] performs the per-cycle exchange: one logical read/write datagram
    covering the whole image, with the lost-frame accounting required by a
    fixed-period control loop.
*/

use core::ops::Range;
use crate::{
    data::{Field, WireData},
    error::{Error, Result},
    registers::AlState,
    session::Session,
    };

/// byte sizes of one device's process images
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProcessLayout {
    pub outputs: u16,
    pub inputs: u16,
}

#[derive(Clone, Debug)]
pub(crate) struct Segment {
    pub position: u16,
    /// output image range in the logical memory
    pub output: Range<usize>,
    /// input image range, right after the outputs
    pub input: Range<usize>,
}

/// placement of every mapped device in the logical memory
#[derive(Clone, Debug, Default)]
pub struct ProcessMap {
    segments: Vec<Segment>,
    len: usize,
}

impl ProcessMap {
    /// pack the given layouts contiguously, in chain position order
    pub(crate) fn build(entries: &[(u16, ProcessLayout)]) -> Self {
        let mut entries = entries.to_vec();
        entries.sort_by_key(|(position, _)| *position);
        let mut offset = 0;
        let segments = entries.iter()
            .map(|(position, layout)| {
                let output = offset .. offset + usize::from(layout.outputs);
                let input = output.end .. output.end + usize::from(layout.inputs);
                offset = input.end;
                Segment {position: *position, output, input}
            })
            .collect();
        Self {segments, len: offset}
    }

    /// total byte size of the logical image
    pub fn len(&self) -> usize {self.len}
    pub fn is_empty(&self) -> bool {self.segments.is_empty()}

    /// mapped chain positions, in order
    pub fn positions(&self) -> impl Iterator<Item = u16> + '_ {
        self.segments.iter().map(|segment| segment.position)
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn segment(&self, position: u16) -> &Segment {
        self.segments.iter()
            .find(|segment| segment.position == position)
            .expect("device not mapped in the process image")
    }
}

/// outcome of one exchange cycle
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Cycle {
    /// the frame came back with the expected working counter, inputs are fresh
    Exchanged,
    /// working counter mismatch or round-trip timeout: inputs kept from the
    /// previous cycle, outputs unchanged, nothing retried within the cycle
    Lost,
}

/// consecutive lost cycles tolerated before declaring the link down
pub const DEFAULT_LOST_THRESHOLD: u32 = 8;

/**
    the fixed-period exchange driver

    Holding a shared borrow of the [Session] pins the session in operational
    mode: discovery and state transitions need an exclusive borrow, so they
    cannot interleave with cyclic operation.
*/
pub struct Cyclic<'a> {
    session: &'a Session,
    map: ProcessMap,
    /// master side copy of the logical image
    image: Vec<u8>,
    lost_streak: u32,
    lost_threshold: u32,
}

impl<'a> Cyclic<'a> {
    pub fn new(session: &'a Session, map: ProcessMap) -> Self {
        let image = vec![0; map.len()];
        Self {
            session,
            map,
            image,
            lost_streak: 0,
            lost_threshold: DEFAULT_LOST_THRESHOLD,
        }
    }

    /// adjust how many consecutive lost cycles escalate to [Error::LinkDown]
    pub fn with_lost_threshold(mut self, cycles: u32) -> Self {
        self.lost_threshold = cycles;
        self
    }

    /// consecutive lost cycles so far
    pub fn lost_streak(&self) -> u32 {self.lost_streak}

    /**
        perform one exchange cycle: write all outputs, read all inputs, in one
        logical read/write datagram

        Refused with [Error::NotOperational], before anything is transmitted,
        unless every mapped device last acknowledged the Operational state.
    */
    pub async fn exchange(&mut self) -> Result<Cycle> {
        for segment in self.map.segments() {
            let operational = self.session.registry()
                .get(segment.position)
                .map_or(false, |device| device.state == AlState::Operational);
            if ! operational {
                return Err(Error::NotOperational);
            }
        }
        let expected = self.map.segments().len() as u16;

        // exchanged on a copy so a lost cycle does not tear the inputs
        let mut wire = self.image.clone();
        match self.session.link().lrw(0, &mut wire).await {
            Ok(answers) if answers == expected => {
                for segment in self.map.segments() {
                    self.image[segment.input.clone()]
                        .copy_from_slice(&wire[segment.input.clone()]);
                }
                self.lost_streak = 0;
                Ok(Cycle::Exchanged)
            }
            Ok(answers) => self.lost(Some(answers), expected),
            Err(Error::Timeout(_)) => self.lost(None, expected),
            Err(err) => Err(err),
        }
    }

    fn lost(&mut self, answers: Option<u16>, expected: u16) -> Result<Cycle> {
        self.lost_streak += 1;
        match answers {
            Some(got) => log::warn!("lost cycle ({} of {} devices answered), streak {}", got, expected, self.lost_streak),
            None => log::warn!("lost cycle (no answer frame), streak {}", self.lost_streak),
        }
        if self.lost_streak >= self.lost_threshold {
            Err(Error::LinkDown(self.lost_streak))
        } else {
            Ok(Cycle::Lost)
        }
    }

    /**
        read a value from a device's input image, as refreshed by the last
        successful exchange

        Panics when the position was not mapped when building the [ProcessMap].
    */
    pub fn get<T: WireData>(&self, position: u16, field: Field<T>) -> T {
        let segment = self.map.segment(position);
        field.get(&self.image[segment.input.clone()])
    }
    /**
        write a value into a device's output image, sent on every following
        exchange

        Panics when the position was not mapped when building the [ProcessMap].
    */
    pub fn set<T: WireData>(&mut self, position: u16, field: Field<T>, value: T) {
        let segment = self.map.segment(position);
        field.set(&mut self.image[segment.output.clone()], value)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_packs_in_position_order() {
        let map = ProcessMap::build(&[
            (2, ProcessLayout {outputs: 4, inputs: 4}),
            (0, ProcessLayout {outputs: 16, inputs: 16}),
            ]);
        assert_eq!(map.len(), 40);
        assert_eq!(map.positions().collect::<Vec<_>>(), vec![0, 2]);
        let segments = map.segments();
        assert_eq!(segments[0].output, 0 .. 16);
        assert_eq!(segments[0].input, 16 .. 32);
        assert_eq!(segments[1].output, 32 .. 36);
        assert_eq!(segments[1].input, 36 .. 40);
    }
}
