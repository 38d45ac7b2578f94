//! Endian-aware binary I/O for dataset elements.
//!
//! All multi-byte encoding goes through [`byteorder`], with the byte order
//! chosen at runtime from an explicit [`Endian`] argument rather than any
//! ambient per-process toggle. The [`Element`] trait covers the six scalar
//! types a chunk can store and provides:
//!
//! - slice encode/decode against in-memory byte buffers,
//! - stream array read/write,
//! - widening to `f64` and narrowing back with range saturation, the single
//!   path used for every non-identity datatype conversion.
//!
//! Short reads and writes surface as ordinary `std::io` errors.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::types::Datatype;

/// Byte order of data on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// The byte order of the machine this library was compiled for.
    pub fn native() -> Endian {
        if cfg!(target_endian = "little") {
            Endian::Little
        } else {
            Endian::Big
        }
    }

    /// Byte order selected by a chunk's `little_endian` flag.
    pub fn from_little_flag(little: bool) -> Endian {
        if little {
            Endian::Little
        } else {
            Endian::Big
        }
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// A scalar type a chunk can store on disk.
pub trait Element: Copy + Default + sealed::Sealed {
    /// The on-disk datatype this element corresponds to.
    const DATATYPE: Datatype;

    /// Encodes `src` into `dst` (`dst.len()` must equal
    /// `src.len() * elem_size`).
    fn encode_slice(src: &[Self], dst: &mut [u8], endian: Endian);

    /// Decodes `src` into `dst` (`src.len()` must equal
    /// `dst.len() * elem_size`).
    fn decode_slice(src: &[u8], dst: &mut [Self], endian: Endian);

    /// Exact widening to `f64` (lossless for every type but `i64`, whose
    /// extreme magnitudes round).
    fn to_f64(self) -> f64;

    /// Narrowing from `f64`, saturating at the numeric range of the target.
    /// Sets `clamped` when a value was out of range. Non-finite inputs pass
    /// through to float targets unflagged.
    fn from_f64(v: f64, clamped: &mut bool) -> Self;
}

macro_rules! int_element {
    ($ty:ty, $dt:expr, $write:ident, $read:ident, $min:expr, $max:expr) => {
        impl Element for $ty {
            const DATATYPE: Datatype = $dt;

            fn encode_slice(src: &[Self], dst: &mut [u8], endian: Endian) {
                match endian {
                    Endian::Big => BigEndian::$write(src, dst),
                    Endian::Little => LittleEndian::$write(src, dst),
                }
            }

            fn decode_slice(src: &[u8], dst: &mut [Self], endian: Endian) {
                match endian {
                    Endian::Big => BigEndian::$read(src, dst),
                    Endian::Little => LittleEndian::$read(src, dst),
                }
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn from_f64(v: f64, clamped: &mut bool) -> Self {
                if v < $min {
                    *clamped = true;
                    <$ty>::MIN
                } else if v > $max {
                    *clamped = true;
                    <$ty>::MAX
                } else {
                    v as $ty
                }
            }
        }
    };
}

int_element!(i16, Datatype::Int16, write_i16_into, read_i16_into, -32768.0, 32767.0);
int_element!(
    i32,
    Datatype::Int32,
    write_i32_into,
    read_i32_into,
    -2147483648.0,
    2147483647.0
);
int_element!(
    i64,
    Datatype::Int64,
    write_i64_into,
    read_i64_into,
    i64::MIN as f64,
    i64::MAX as f64
);

impl Element for u8 {
    const DATATYPE: Datatype = Datatype::Uint8;

    fn encode_slice(src: &[Self], dst: &mut [u8], _endian: Endian) {
        dst.copy_from_slice(src);
    }

    fn decode_slice(src: &[u8], dst: &mut [Self], _endian: Endian) {
        dst.copy_from_slice(src);
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64, clamped: &mut bool) -> Self {
        if v < 0.0 {
            *clamped = true;
            0
        } else if v > 255.0 {
            *clamped = true;
            255
        } else {
            v as u8
        }
    }
}

impl Element for f32 {
    const DATATYPE: Datatype = Datatype::Float32;

    fn encode_slice(src: &[Self], dst: &mut [u8], endian: Endian) {
        match endian {
            Endian::Big => BigEndian::write_f32_into(src, dst),
            Endian::Little => LittleEndian::write_f32_into(src, dst),
        }
    }

    fn decode_slice(src: &[u8], dst: &mut [Self], endian: Endian) {
        match endian {
            Endian::Big => BigEndian::read_f32_into(src, dst),
            Endian::Little => LittleEndian::read_f32_into(src, dst),
        }
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(v: f64, clamped: &mut bool) -> Self {
        if !v.is_finite() {
            // NaN and infinities keep their float meaning when narrowed.
            return v as f32;
        }
        if v < -(f32::MAX as f64) {
            *clamped = true;
            -f32::MAX
        } else if v > f32::MAX as f64 {
            *clamped = true;
            f32::MAX
        } else {
            v as f32
        }
    }
}

impl Element for f64 {
    const DATATYPE: Datatype = Datatype::Float64;

    fn encode_slice(src: &[Self], dst: &mut [u8], endian: Endian) {
        match endian {
            Endian::Big => BigEndian::write_f64_into(src, dst),
            Endian::Little => LittleEndian::write_f64_into(src, dst),
        }
    }

    fn decode_slice(src: &[u8], dst: &mut [Self], endian: Endian) {
        match endian {
            Endian::Big => BigEndian::read_f64_into(src, dst),
            Endian::Little => LittleEndian::read_f64_into(src, dst),
        }
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(v: f64, _clamped: &mut bool) -> Self {
        v
    }
}

// ---------------------------------------------------------------------------
// Stream array forms
// ---------------------------------------------------------------------------

/// Reads `dst.len()` elements from `r` in the given byte order.
pub fn read_array<T: Element>(r: &mut impl Read, dst: &mut [T], endian: Endian) -> io::Result<()> {
    let mut bytes = vec![0u8; dst.len() * T::DATATYPE.elem_size() as usize];
    r.read_exact(&mut bytes)?;
    T::decode_slice(&bytes, dst, endian);
    Ok(())
}

/// Writes all of `src` to `w` in the given byte order.
pub fn write_array<T: Element>(w: &mut impl Write, src: &[T], endian: Endian) -> io::Result<()> {
    let mut bytes = vec![0u8; src.len() * T::DATATYPE.elem_size() as usize];
    T::encode_slice(src, &mut bytes, endian);
    w.write_all(&bytes)
}

/// Reads a single element.
pub fn read_scalar<T: Element>(r: &mut impl Read, endian: Endian) -> io::Result<T> {
    let mut one = [T::default()];
    read_array(r, &mut one, endian)?;
    Ok(one[0])
}

/// Writes a single element.
pub fn write_scalar<T: Element>(w: &mut impl Write, v: T, endian: Endian) -> io::Result<()> {
    write_array(w, &[v], endian)
}

// ---------------------------------------------------------------------------
// Dynamic (datatype-driven) forms
// ---------------------------------------------------------------------------

fn read_block_as<T: Element>(
    r: &mut impl Read,
    out: &mut [f64],
    endian: Endian,
) -> io::Result<()> {
    let mut scratch = vec![T::default(); out.len()];
    read_array(r, &mut scratch, endian)?;
    for (o, v) in out.iter_mut().zip(scratch.iter()) {
        *o = v.to_f64();
    }
    Ok(())
}

/// Reads `out.len()` on-disk elements of type `dt` and widens them to `f64`.
pub fn read_block_f64(
    r: &mut impl Read,
    dt: Datatype,
    endian: Endian,
    out: &mut [f64],
) -> io::Result<()> {
    match dt {
        Datatype::Uint8 => read_block_as::<u8>(r, out, endian),
        Datatype::Int16 => read_block_as::<i16>(r, out, endian),
        Datatype::Int32 => read_block_as::<i32>(r, out, endian),
        Datatype::Int64 => read_block_as::<i64>(r, out, endian),
        Datatype::Float32 => read_block_as::<f32>(r, out, endian),
        Datatype::Float64 => read_block_as::<f64>(r, out, endian),
    }
}

fn write_block_as<T: Element>(
    w: &mut impl Write,
    src: &[f64],
    endian: Endian,
    clamped: &mut bool,
) -> io::Result<()> {
    let mut scratch = vec![T::default(); src.len()];
    for (s, v) in scratch.iter_mut().zip(src.iter()) {
        *s = T::from_f64(*v, clamped);
    }
    write_array(w, &scratch, endian)
}

/// Narrows `src` to on-disk elements of type `dt` (saturating, flagging
/// `clamped` on any out-of-range value) and writes them.
pub fn write_block_f64(
    w: &mut impl Write,
    dt: Datatype,
    endian: Endian,
    src: &[f64],
    clamped: &mut bool,
) -> io::Result<()> {
    match dt {
        Datatype::Uint8 => write_block_as::<u8>(w, src, endian, clamped),
        Datatype::Int16 => write_block_as::<i16>(w, src, endian, clamped),
        Datatype::Int32 => write_block_as::<i32>(w, src, endian, clamped),
        Datatype::Int64 => write_block_as::<i64>(w, src, endian, clamped),
        Datatype::Float32 => write_block_as::<f32>(w, src, endian, clamped),
        Datatype::Float64 => write_block_as::<f64>(w, src, endian, clamped),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_byte_order() {
        let mut bytes = [0u8; 4];
        i32::encode_slice(&[0x0102_0304], &mut bytes, Endian::Little);
        assert_eq!(bytes, [0x04, 0x03, 0x02, 0x01]);
        i32::encode_slice(&[0x0102_0304], &mut bytes, Endian::Big);
        assert_eq!(bytes, [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn stream_round_trip_swapped() {
        let src: Vec<i16> = vec![-1, 0, 1, 256, -257];
        let mut buf = Vec::new();
        write_array(&mut buf, &src, Endian::Big).unwrap();
        let mut back = vec![0i16; src.len()];
        read_array(&mut buf.as_slice(), &mut back, Endian::Big).unwrap();
        assert_eq!(back, src);
    }

    #[test]
    fn short_read_is_an_error() {
        let bytes = [0u8; 3];
        let mut dst = [0i16; 2];
        let err = read_array(&mut &bytes[..], &mut dst, Endian::Little).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn narrowing_saturates_and_flags() {
        let mut clamped = false;
        assert_eq!(u8::from_f64(-3.0, &mut clamped), 0);
        assert!(clamped);

        clamped = false;
        assert_eq!(i16::from_f64(1e9, &mut clamped), i16::MAX);
        assert!(clamped);

        clamped = false;
        assert_eq!(i16::from_f64(12.0, &mut clamped), 12);
        assert!(!clamped);

        clamped = false;
        assert_eq!(f32::from_f64(1e40, &mut clamped), f32::MAX);
        assert!(clamped);
    }

    #[test]
    fn nonfinite_passes_through_to_float() {
        let mut clamped = false;
        assert!(f32::from_f64(f64::INFINITY, &mut clamped).is_infinite());
        assert!(f32::from_f64(f64::NAN, &mut clamped).is_nan());
        assert!(!clamped);
    }

    #[test]
    fn f64_widening_is_exact_for_f32() {
        for v in [0.0f32, -1.5, f32::MAX, f32::MIN_POSITIVE] {
            assert_eq!(v.to_f64() as f32, v);
        }
    }
}
