//! Traits and helpers to read/write typed data from/to wire byte sequences.

use core::{
    marker::PhantomData,
    fmt,
    };

/**
    trait for data types that can be packed/unpacked to/from a raw byte buffer

    Everything crossing the wire implements this, either by hand for the
    primitive types below or through the [`bilge_wiredata`]/[`packed_wiredata`]
    adapter macros for bitfield and packed structs.
*/
pub trait WireData: Sized {
    type Packed: Storage;

    fn pack(&self, dst: &mut [u8]) -> PackingResult<()>;
    fn unpack(src: &[u8]) -> PackingResult<Self>;

    fn packed_size() -> usize {<Self::Packed as crate::data::Storage>::LEN}
}

/// errors raised when packing/unpacking wire data
#[derive(Copy, Clone, Debug)]
pub enum PackingError {
    BadSize(usize, &'static str),
    InvalidValue(&'static str),
}

pub type PackingResult<T> = Result<T, PackingError>;

/// byte-array abstraction, needed because rust does not support generic consts in const expressions
pub trait Storage: AsRef<[u8]> + AsMut<[u8]> {
    const LEN: usize;
    fn zeroed() -> Self;
}
impl<const N: usize> Storage for [u8; N] {
    const LEN: usize = N;
    fn zeroed() -> Self {[0; N]}
}

impl<const N: usize> WireData for [u8; N] {
    type Packed = Self;

    fn pack(&self, dst: &mut [u8]) -> PackingResult<()> {
        if dst.len() < N
            {return Err(PackingError::BadSize(dst.len(), "not enough room for byte array"))}
        dst[.. N].copy_from_slice(self);
        Ok(())
    }
    fn unpack(src: &[u8]) -> PackingResult<Self> {
        if src.len() < N
            {return Err(PackingError::BadSize(src.len(), "not enough bytes for byte array"))}
        let mut value = [0; N];
        value.copy_from_slice(&src[.. N]);
        Ok(value)
    }
}

impl WireData for () {
    type Packed = [u8; 0];

    fn pack(&self, _dst: &mut [u8]) -> PackingResult<()> {Ok(())}
    fn unpack(_src: &[u8]) -> PackingResult<Self> {Ok(())}
}

impl WireData for bool {
    type Packed = [u8; 1];

    fn pack(&self, dst: &mut [u8]) -> PackingResult<()> {
        if dst.is_empty()
            {return Err(PackingError::BadSize(0, "not enough room for bool"))}
        dst[0] = u8::from(*self);
        Ok(())
    }
    fn unpack(src: &[u8]) -> PackingResult<Self> {
        if src.is_empty()
            {return Err(PackingError::BadSize(0, "not enough bytes for bool"))}
        Ok(src[0] & 0b1 == 0b1)
    }
}

/// macro implementing [WireData] for a struct generated with `bilge`
/// unsafe transmutes overcome the lack of traits exposing the containing ints in `bilge`,
/// they are only used on types where every bit pattern of the containing int is valid
macro_rules! bilge_wiredata {
    ($t: ty, $id: ident) => { impl crate::data::WireData for $t {
        type Packed = [u8; ($id::BITS as usize + 7)/8];

        fn pack(&self, dst: &mut [u8]) -> crate::data::PackingResult<()> {
            if dst.len() < <Self::Packed as crate::data::Storage>::LEN
                {return Err(crate::data::PackingError::BadSize(dst.len(), "bilge struct needs exact size"))}
            dst[.. <Self::Packed as crate::data::Storage>::LEN].copy_from_slice(&unsafe{ core::mem::transmute_copy::<Self, Self::Packed>(self) });
            Ok(())
        }
        fn unpack(src: &[u8]) -> crate::data::PackingResult<Self> {
            if src.len() < <Self::Packed as crate::data::Storage>::LEN
                {return Err(crate::data::PackingError::BadSize(src.len(), "bilge struct needs exact size"))}
            let mut tmp = [0; core::mem::size_of::<Self>()];
            tmp[.. <Self::Packed as crate::data::Storage>::LEN].copy_from_slice(&src[.. <Self::Packed as crate::data::Storage>::LEN]);
            Ok(unsafe{ core::mem::transmute::<[u8; core::mem::size_of::<Self>()], Self>(tmp) })
        }
    }};
}
pub(crate) use bilge_wiredata;

/// macro implementing [WireData] for a struct with `repr(packed)` made of plain ints
macro_rules! packed_wiredata {
    ($t: ty) => { impl crate::data::WireData for $t {
        type Packed = [u8; core::mem::size_of::<$t>()];

        fn pack(&self, dst: &mut [u8]) -> crate::data::PackingResult<()> {
            if dst.len() < <Self::Packed as crate::data::Storage>::LEN
                {return Err(crate::data::PackingError::BadSize(dst.len(), "not enough room for struct"))}
            dst[.. <Self::Packed as crate::data::Storage>::LEN].copy_from_slice(&unsafe{ core::mem::transmute_copy::<Self, Self::Packed>(self) });
            Ok(())
        }
        fn unpack(src: &[u8]) -> crate::data::PackingResult<Self> {
            if src.len() < <Self::Packed as crate::data::Storage>::LEN
                {return Err(crate::data::PackingError::BadSize(src.len(), "not enough bytes for struct"))}
            let src: &Self::Packed = src[.. <Self::Packed as crate::data::Storage>::LEN].try_into()
                .map_err(|_| crate::data::PackingError::BadSize(src.len(), "not enough bytes for struct"))?;
            Ok(unsafe{ core::mem::transmute::<Self::Packed, Self>(*src) })
        }
    }};
}
pub(crate) use packed_wiredata;

/// macro implementing [WireData] for numeric types
macro_rules! num_wiredata {
    ($t: ty) => { impl crate::data::WireData for $t {
        type Packed = [u8; core::mem::size_of::<$t>()];

        fn pack(&self, dst: &mut [u8]) -> crate::data::PackingResult<()> {
            if dst.len() < <Self::Packed as crate::data::Storage>::LEN
                {return Err(crate::data::PackingError::BadSize(dst.len(), "not enough room for integer"))}
            dst[.. <Self::Packed as crate::data::Storage>::LEN].copy_from_slice(&self.to_le_bytes());
            Ok(())
        }
        fn unpack(src: &[u8]) -> crate::data::PackingResult<Self> {
            Ok(Self::from_le_bytes(src
                .get(.. <Self::Packed as crate::data::Storage>::LEN)
                .ok_or(crate::data::PackingError::BadSize(src.len(), "not enough bytes for integer"))?
                .try_into()
                .map_err(|_| crate::data::PackingError::BadSize(src.len(), "not enough bytes for integer"))?
                ))
        }
    }};
}

num_wiredata!(u8);
num_wiredata!(u16);
num_wiredata!(u32);
num_wiredata!(u64);
num_wiredata!(i8);
num_wiredata!(i16);
num_wiredata!(i32);
num_wiredata!(i64);


/**
    locate some data in a byte sequence by its byte position and length, extracted to type `T` to be processed in rust

    It acts like a getter/setter of a value in a byte sequence. One can think of it as an offset to a data location: it does not point the data itself but only its offset in the byte sequence, plus its length in order to dynamically check memory bounds.
*/
#[derive(Default, Eq, Hash)]
pub struct Field<T: WireData> {
    /// this is only here to mark that T is actually used
    extracted: PhantomData<T>,
    /// start byte index of the object
    pub byte: usize,
    /// byte length of the object
    pub len: usize,
}
impl<T: WireData> Field<T> {
    /// build a Field from its byte offset and byte length
    pub const fn new(byte: usize, len: usize) -> Self {
        Self{extracted: PhantomData, byte, len}
    }
    /// build a Field from its byte offset, infering its length from the data nominal size
    pub const fn simple(byte: usize) -> Self {
        Self{extracted: PhantomData, byte, len: T::Packed::LEN}
    }

    /// extract the value pointed by the field in the given byte array
    pub fn get(&self, data: &[u8]) -> T {
        T::unpack(&data[self.byte ..][.. self.len])
            .expect("cannot unpack from data")
    }
    /// dump the given value to the place pointed by the field in the byte array
    pub fn set(&self, data: &mut [u8], value: T) {
        value.pack(&mut data[self.byte ..][.. self.len])
            .expect("cannot pack data")
    }
}
impl<T: WireData> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Field{{0x{:x}, {}}}", self.byte, self.len)
    }
}
// [Clone] and [Copy] must be implemented manually to allow copying a field pointing to a type which does not implement them
impl<T: WireData> Clone for Field<T> {
    fn clone(&self) -> Self {Self::new(self.byte, self.len)}
}
impl<T: WireData> Copy for Field<T> {}
impl<T: WireData> PartialEq for Field<T> {
    fn eq(&self, other: &Self) -> bool {
        self.byte == other.byte && self.len == other.len
    }
}


/**
    helper to read/write sequential data from/to a byte slice

    It is close to what [std::io::Cursor] is doing, but returns slices without copying the data and works with [WireData]. All accesses are bounds-checked and return [PackingError::BadSize] instead of panicking when the slice is exhausted.
*/
pub struct Cursor<T> {
    position: usize,
    data: T,
}
impl<T> Cursor<T> {
    /// create a new cursor starting at position zero in the given slice
    pub fn new(data: T) -> Self {Self{position: 0, data}}
    /// current position in the read/write slice
    pub fn position(&self) -> usize {self.position}
}
impl<'a> Cursor<&'a [u8]> {
    /// read the next coming bytes as a [WireData] value, and increment the position
    pub fn unpack<T: WireData>(&mut self) -> PackingResult<T> {
        let value = T::unpack(self.data.get(self.position ..)
            .ok_or(PackingError::BadSize(0, "cursor exhausted"))?)?;
        self.position += T::Packed::LEN;
        Ok(value)
    }
    /// read the next coming `size` bytes and increment the position
    pub fn read(&mut self, size: usize) -> PackingResult<&'a [u8]> {
        let end = self.position.checked_add(size)
            .filter(|end| *end <= self.data.len())
            .ok_or(PackingError::BadSize(size, "cursor exhausted"))?;
        let slice = &self.data[self.position .. end];
        self.position = end;
        Ok(slice)
    }
    /// return all the remaining bytes after current position, but does not advance the cursor
    pub fn remain(&self) -> &'a [u8] {
        &self.data[self.position ..]
    }
}
impl<'a> Cursor<&'a mut [u8]> {
    /// write the next coming bytes with a [WireData] value, and increment the position
    pub fn pack<T: WireData>(&mut self, value: &T) -> PackingResult<()> {
        value.pack(self.data.get_mut(self.position ..)
            .ok_or(PackingError::BadSize(0, "cursor exhausted"))?)?;
        self.position += T::Packed::LEN;
        Ok(())
    }
    /// write the next coming bytes with the given slice, and increment the position
    pub fn write(&mut self, value: &[u8]) -> PackingResult<()> {
        let end = self.position.checked_add(value.len())
            .filter(|end| *end <= self.data.len())
            .ok_or(PackingError::BadSize(value.len(), "cursor exhausted"))?;
        self.data[self.position .. end].copy_from_slice(value);
        self.position = end;
        Ok(())
    }
    /// consume self and return a slice until current position
    pub fn finish(self) -> &'a mut [u8] {
        &mut self.data[.. self.position]
    }
}
