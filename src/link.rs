/*!
    serialized frame round trips over a [BusSocket].

    [Link] owns the socket plus a dedicated reception thread. Exactly one frame
    is in flight at a time: every round trip, whatever the number of datagrams
    inside, locks the link, stamps consecutive tokens, sends, and waits for the
    matching answer under a mandatory timeout. No retry lives here, retry
    policy belongs to the callers.
*/

use std::{
    sync::{Arc, Mutex, atomic::{AtomicBool, Ordering}},
    thread::JoinHandle,
    };
use core::time::Duration;
use tokio::sync::Notify;

use crate::{
    data::{Field, WireData, Storage},
    error::{Error, Result},
    frame::{self, Command, FrameBuf, MAX_FRAME},
    socket::BusSocket,
    };

/// one datagram of a round trip: the request fields, then the answer in place
pub struct Exchange {
    pub command: Command,
    pub slave: u16,
    pub offset: u16,
    /// payload sent, overwritten with the payload received
    pub data: Vec<u8>,
    /// working counter of the answer
    pub answers: u16,
}

/// answer of a typed command: the decoded value plus the working counter
pub struct Answer<T> {
    pub answers: u16,
    pub value: T,
}
impl<T> Answer<T> {
    /// expect exactly one device to have answered
    pub fn one(self) -> Result<T> {
        self.exact(1)
    }
    /// expect exactly `n` devices to have answered
    pub fn exact(self, n: u16) -> Result<T> {
        if self.answers == n {
            Ok(self.value)
        } else {
            Err(Error::LostFrame {expected: n, got: self.answers})
        }
    }
}

/// dynamically specifies a destination address on the device chain
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceAddress {
    /// every device will receive and execute
    Broadcast,
    /// address determined by the topology (index of the device in the chain)
    Position(u16),
    /// address set by the master during discovery
    Fixed(u16),
    /// the logical memory is the destination, all mapped devices are concerned
    Logical,
}

/// answer slot for one in-flight datagram
struct Slot {
    filled: bool,
    answers: u16,
    buffer: Vec<u8>,
}
struct Pending {
    first_token: u8,
    remaining: usize,
    slots: Vec<Slot>,
}

struct Shared {
    socket: Box<dyn BusSocket>,
    pending: Mutex<Option<Pending>>,
    received: Notify,
    shutdown: AtomicBool,
}

pub struct Link {
    shared: Arc<Shared>,
    /// serializes round trips and carries the next token
    busy: tokio::sync::Mutex<u8>,
    timeout: Duration,
    receiver: Option<JoinHandle<()>>,
}

impl Link {
    /// wrap a socket and start the reception thread
    pub fn new<S: BusSocket + 'static>(socket: S, timeout: Duration) -> Self {
        let shared = Arc::new(Shared {
            socket: Box::new(socket),
            pending: Mutex::new(None),
            received: Notify::new(),
            shutdown: AtomicBool::new(false),
        });
        let receiver = {
            let shared = shared.clone();
            std::thread::spawn(move || shared.receive_loop())
        };
        Self {
            shared,
            busy: tokio::sync::Mutex::new(0),
            timeout,
            receiver: Some(receiver),
        }
    }

    /// round-trip a batch of datagrams in one frame, answers land back in the batch
    pub async fn run(&self, batch: &mut [Exchange]) -> Result<()> {
        if batch.is_empty() {return Ok(())}

        let mut token = self.busy.lock().await;
        let first = *token;
        *token = token.wrapping_add(batch.len() as u8);

        let mut frame = FrameBuf::new();
        for (i, exchange) in batch.iter().enumerate() {
            frame.push(
                exchange.command,
                first.wrapping_add(i as u8),
                exchange.slave,
                exchange.offset,
                &exchange.data,
                0,
                )?;
        }

        *self.shared.pending.lock().unwrap() = Some(Pending {
            first_token: first,
            remaining: batch.len(),
            slots: batch.iter()
                .map(|exchange| Slot {
                    filled: false,
                    answers: 0,
                    buffer: vec![0; exchange.data.len()],
                    })
                .collect(),
        });

        log::trace!("send {} datagrams, first token {}", batch.len(), first);
        if let Err(err) = self.shared.socket.send(frame.finish()) {
            self.shared.pending.lock().unwrap().take();
            return Err(err.into());
        }

        let complete = async {
            loop {
                if self.shared.pending.lock().unwrap()
                    .as_ref()
                    .map_or(true, |pending| pending.remaining == 0)
                    {break}
                self.shared.received.notified().await;
            }
        };
        if tokio::time::timeout(self.timeout, complete).await.is_err() {
            self.shared.pending.lock().unwrap().take();
            return Err(Error::Timeout("waiting for the answer frame"));
        }

        let pending = self.shared.pending.lock().unwrap().take()
            .ok_or(Error::Master("answer slot vanished during the round trip"))?;
        for (exchange, slot) in batch.iter_mut().zip(pending.slots) {
            exchange.data.copy_from_slice(&slot.buffer);
            exchange.answers = slot.answers;
        }
        Ok(())
    }

    /// maps to a `*rd` command
    pub async fn read<T: WireData>(&self, slave: DeviceAddress, memory: Field<T>) -> Result<Answer<T>> {
        let (command, slave) = match slave {
            DeviceAddress::Broadcast => (Command::BRD, 0),
            DeviceAddress::Position(position) => (Command::APRD, 0u16.wrapping_sub(position)),
            DeviceAddress::Fixed(address) => (Command::FPRD, address),
            DeviceAddress::Logical => (Command::LRD, 0),
            };
        let mut batch = [Exchange {
            command, slave,
            offset: memory.byte as u16,
            data: vec![0; memory.len],
            answers: 0,
            }];
        self.run(&mut batch).await?;
        Ok(Answer {
            answers: batch[0].answers,
            value: T::unpack(&batch[0].data)?,
        })
    }
    /// maps to a `*wr` command
    pub async fn write<T: WireData>(&self, slave: DeviceAddress, memory: Field<T>, value: T) -> Result<Answer<()>> {
        let (command, slave) = match slave {
            DeviceAddress::Broadcast => (Command::BWR, 0),
            DeviceAddress::Position(position) => (Command::APWR, 0u16.wrapping_sub(position)),
            DeviceAddress::Fixed(address) => (Command::FPWR, address),
            DeviceAddress::Logical => (Command::LWR, 0),
            };
        let mut buffer = T::Packed::zeroed();
        value.pack(buffer.as_mut())?;
        let mut batch = [Exchange {
            command, slave,
            offset: memory.byte as u16,
            data: buffer.as_ref()[.. memory.len].to_vec(),
            answers: 0,
            }];
        self.run(&mut batch).await?;
        Ok(Answer {answers: batch[0].answers, value: ()})
    }

    // shorthands to the common commands
    pub async fn brd<T: WireData>(&self, memory: Field<T>) -> Result<Answer<T>> {
        self.read(DeviceAddress::Broadcast, memory).await
    }
    pub async fn bwr<T: WireData>(&self, memory: Field<T>, value: T) -> Result<Answer<()>> {
        self.write(DeviceAddress::Broadcast, memory, value).await
    }
    pub async fn aprd<T: WireData>(&self, position: u16, memory: Field<T>) -> Result<Answer<T>> {
        self.read(DeviceAddress::Position(position), memory).await
    }
    pub async fn apwr<T: WireData>(&self, position: u16, memory: Field<T>, value: T) -> Result<Answer<()>> {
        self.write(DeviceAddress::Position(position), memory, value).await
    }
    pub async fn fprd<T: WireData>(&self, address: u16, memory: Field<T>) -> Result<Answer<T>> {
        self.read(DeviceAddress::Fixed(address), memory).await
    }
    pub async fn fpwr<T: WireData>(&self, address: u16, memory: Field<T>, value: T) -> Result<Answer<()>> {
        self.write(DeviceAddress::Fixed(address), memory, value).await
    }

    /// logical read & write over a raw image, returns the working counter
    pub async fn lrw(&self, offset: u16, image: &mut [u8]) -> Result<u16> {
        let mut batch = [Exchange {
            command: Command::LRW,
            slave: 0,
            offset,
            data: image.to_vec(),
            answers: 0,
            }];
        self.run(&mut batch).await?;
        image.copy_from_slice(&batch[0].data);
        Ok(batch[0].answers)
    }

    /// stop the reception thread, called on drop as well
    pub fn close(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        if let Some(receiver) = self.receiver.take() {
            let _ = receiver.join();
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn receive_loop(&self) {
        #[cfg(target_os = "linux")]
        if let Err(err) = thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max) {
            log::warn!("cannot raise reception thread priority: {:?}", err);
        }

        let mut buffer = [0; MAX_FRAME];
        while ! self.shutdown.load(Ordering::Relaxed) {
            match self.socket.receive(&mut buffer) {
                Ok(size) => self.process(&buffer[.. size]),
                Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => continue,
                Err(err) => {
                    log::error!("reception stopped: {}", err);
                    break;
                }
            }
        }
    }

    fn process(&self, received: &[u8]) {
        if let Err(err) = self.dispatch(received) {
            log::warn!("discarding received frame: {}", err);
        }
    }

    /// route each received datagram to the answer slot wearing its token
    fn dispatch(&self, received: &[u8]) -> Result<()> {
        let datagrams = frame::parse(received)?;
        let mut guard = self.pending.lock().unwrap();
        let Some(pending) = guard.as_mut() else {return Ok(())};
        let mut completed = false;
        for item in datagrams {
            let datagram = item?;
            let index = datagram.header.token().wrapping_sub(pending.first_token) as usize;
            let Some(slot) = pending.slots.get_mut(index) else {continue};
            if slot.filled || slot.buffer.len() != datagram.data.len() {continue}
            slot.buffer.copy_from_slice(datagram.data);
            slot.answers = datagram.working_count;
            slot.filled = true;
            pending.remaining -= 1;
            completed = pending.remaining == 0;
        }
        drop(guard);
        if completed {
            self.received.notify_one();
        }
        Ok(())
    }
}
