use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use packed_struct::prelude::*;
use packed_struct::types::bits::ByteArray;
use super::BusSocket;

/// EtherType of fieldbus frames
const ETHERTYPE: u16 = 0x88a4;
/// receive timeout so the reception loop can poll for shutdown
const RECEIVE_TIMEOUT: libc::timeval = libc::timeval {tv_sec: 0, tv_usec: 100_000};

/**
    Raw socket allowing direct fieldbus communication on one ethernet segment.

    Raw sockets are not implemented in std::net, so here is an implementation
    in the manner of `smoltcp`. This implementation is linux-specific.
*/
#[derive(Debug)]
pub struct EthernetSocket {
    protocol: libc::c_ushort,
    lower: libc::c_int,
    ifreq: ifreq,
}

impl EthernetSocket {
    pub fn new(interface: &str) -> io::Result<Self> {
        // create
        let lower = unsafe {
            let lower = libc::socket(
                // Ethernet II frames
                libc::AF_PACKET,
                libc::SOCK_RAW,
                ETHERTYPE.to_be() as i32,
            );
            if lower == -1 {
                return Err(io::Error::last_os_error());
            }
            lower
        };

        let mut new = EthernetSocket {
            protocol: ETHERTYPE,
            lower,
            ifreq: ifreq_for(interface),
        };

        // bind to the chosen interface
        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: new.protocol.to_be() as u16,
            sll_ifindex: ifreq_ioctl(new.lower, &mut new.ifreq, libc::SIOCGIFINDEX)?,
            sll_hatype: 1,
            sll_pkttype: 0,
            sll_halen: 6,
            sll_addr: [0; 8],
        };

        unsafe {
            #[allow(trivial_casts)]
            let res = libc::bind(
                new.lower,
                &sockaddr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            );
            if res == -1 {
                return Err(io::Error::last_os_error());
            }
        }

        // bounded blocking reads
        unsafe {
            #[allow(trivial_casts)]
            let res = libc::setsockopt(
                new.lower,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &RECEIVE_TIMEOUT as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            );
            if res == -1 {
                return Err(io::Error::last_os_error());
            }
        }

        Ok(new)
    }
}

impl Drop for EthernetSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.lower);
        }
    }
}

impl AsRawFd for EthernetSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.lower
    }
}

impl BusSocket for EthernetSocket {
    fn receive(&self, data: &mut [u8]) -> io::Result<usize> {
        let header_len = <EthernetHeader as PackedStruct>::ByteArray::len();
        let mut packed = [0u8; 4096];
        loop {
            let len = unsafe {
                libc::read(
                    self.as_raw_fd(),
                    packed.as_mut_ptr() as *mut libc::c_void,
                    packed.len(),
                )
            };
            if len < 0 {
                return Err(io::Error::last_os_error());
            }
            let len = len as usize;
            if len < header_len {continue}
            let header = EthernetHeader::unpack_from_slice(&packed[.. header_len])
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "unreadable ethernet header"))?;
            // the bound protocol already filters, but stray frames can slip through
            if header.ty != ETHERTYPE {continue}
            let content = &packed[header_len .. len];
            if content.len() > data.len() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "frame bigger than the receive buffer"));
            }
            data[.. content.len()].copy_from_slice(content);
            return Ok(content.len());
        }
    }
    fn send(&self, data: &[u8]) -> io::Result<()> {
        let mut packed = heapless::Vec::<u8, 4096>::new();
        let overflow = || io::Error::new(io::ErrorKind::InvalidInput, "frame bigger than the medium allows");
        packed.extend_from_slice(EthernetHeader {
            // every device on the segment shall process the frame
            dst: [0xff; 6],
            // locally administered source, the segment carries no other traffic
            src: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
            ty: ETHERTYPE,
            }.pack()
            .map_err(|_| overflow())?
            .as_bytes_slice())
            .map_err(|_| overflow())?;
        packed.extend_from_slice(data).map_err(|_| overflow())?;
        // pad to the ethernet minimum
        while packed.len() < 60 {
            packed.push(0).map_err(|_| overflow())?;
        }
        let data = packed.as_slice();

        let len = unsafe {
            libc::write(
                self.as_raw_fd(),
                data.as_ptr() as *const libc::c_void,
                data.len(),
            )
        };
        if len < 0 || (len as usize) != data.len() {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}


// intermediate C-like structures and functions

#[repr(C)]
#[derive(Debug)]
struct ifreq {
    ifr_name: [libc::c_char; libc::IF_NAMESIZE],
    ifr_data: libc::c_int, /* ifr_ifindex or ifr_mtu */
}

fn ifreq_ioctl(
    lower: libc::c_int,
    ifreq: &mut ifreq,
    cmd: libc::c_ulong,
) -> io::Result<libc::c_int> {
    unsafe {
        #[allow(trivial_casts)]
        let res = libc::ioctl(lower, cmd, ifreq as *mut ifreq);

        if res == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(ifreq.ifr_data)
}

fn ifreq_for(name: &str) -> ifreq {
    let mut ifreq = ifreq {
        ifr_name: [0; libc::IF_NAMESIZE],
        ifr_data: 0,
    };
    for (i, byte) in name.as_bytes().iter().enumerate() {
        ifreq.ifr_name[i] = *byte as libc::c_char
    }
    ifreq
}


#[derive(PackedStruct, Clone, Debug)]
#[packed_struct(size_bytes="14", bit_numbering = "lsb0", endian = "msb")]
struct EthernetHeader {
    #[packed_field(bytes="8:13")]  dst: [u8; 6],
    #[packed_field(bytes="2:7")]   src: [u8; 6],
    #[packed_field(bytes="0:1")]   ty: u16,
}
