//! Checksums used by the container formats and by `.gnu_debuglink`.

const CRC32_POLY: u32 = 0xedb8_8320;
const CRC64_POLY: u64 = 0xc96c_5795_d787_0f42;

/// Largest run of bytes Adler-32 can sum before the 32-bit accumulators may overflow.
const ADLER_NMAX: usize = 5552;
const ADLER_MOD: u32 = 65521;

const fn crc32_table() -> [u32; 256]
{
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ CRC32_POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const fn crc64_table() -> [u64; 256]
{
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u64;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ CRC64_POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC32_TABLE: [u32; 256] = crc32_table();
static CRC64_TABLE: [u64; 256] = crc64_table();

/// Continue a CRC-32 (IEEE 802.3, as used by zlib, XZ and `.gnu_debuglink`).
///
/// Start with `crc = 0`; feeding data in pieces gives the same result as one call.
#[must_use]
pub fn crc32_update(crc: u32, data: &[u8]) -> u32
{
    let mut crc = !crc;
    for &byte in data {
        crc = CRC32_TABLE[((crc ^ u32::from(byte)) & 0xff) as usize] ^ (crc >> 8);
    }
    !crc
}

/// CRC-32 of `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32
{
    crc32_update(0, data)
}

/// CRC-64 (ECMA-182, reflected) as used by the XZ check type 4.
#[must_use]
pub fn crc64(data: &[u8]) -> u64
{
    let mut crc = !0u64;
    for &byte in data {
        crc = CRC64_TABLE[((crc ^ u64::from(byte)) & 0xff) as usize] ^ (crc >> 8);
    }
    !crc
}

/// Continue an Adler-32 (zlib trailer). Start with `adler = 1`.
#[must_use]
pub fn adler32_update(adler: u32, data: &[u8]) -> u32
{
    let mut a = adler & 0xffff;
    let mut b = adler >> 16;
    for block in data.chunks(ADLER_NMAX) {
        for &byte in block {
            a += u32::from(byte);
            b += a;
        }
        a %= ADLER_MOD;
        b %= ADLER_MOD;
    }
    (b << 16) | a
}

/// Adler-32 of `data`.
#[must_use]
pub fn adler32(data: &[u8]) -> u32
{
    adler32_update(1, data)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_crc32_check_value()
    {
        assert_eq!(crc32(b"123456789"), 0xcbf4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_crc32_incremental_matches_single_pass()
    {
        let data = b"the quick brown fox jumps over the lazy dog";
        let split = crc32_update(crc32_update(0, &data[..10]), &data[10..]);
        assert_eq!(split, crc32(data));
    }

    #[test]
    fn test_crc64_check_value()
    {
        assert_eq!(crc64(b"123456789"), 0x995d_c9bb_df19_39fa);
    }

    #[test]
    fn test_adler32_known_values()
    {
        assert_eq!(adler32(b"Wikipedia"), 0x11e6_0398);
        assert_eq!(adler32(b""), 1);
    }

    #[test]
    fn test_adler32_large_input_blocks()
    {
        // Exercises the modulo reduction between blocks.
        let data = vec![0xffu8; ADLER_NMAX * 3 + 17];
        let mut a: u64 = 1;
        let mut b: u64 = 0;
        for &byte in &data {
            a = (a + u64::from(byte)) % u64::from(ADLER_MOD);
            b = (b + a) % u64::from(ADLER_MOD);
        }
        assert_eq!(adler32(&data), ((b << 16) | a) as u32);
    }
}
