// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023
// - Volker Schwaberow <volker@schwaberow.de>

use byteorder::{BigEndian, ByteOrder};

/// Standard block checksum: the value that makes the big-endian word sum
/// of the block, checksum word included, equal to zero.
pub fn block_checksum(buf: &[u8], checksum_offset: usize) -> u32 {
    let skip = checksum_offset / 4;
    buf.chunks_exact(4)
        .enumerate()
        .filter(|&(i, _)| i != skip)
        .fold(0u32, |sum, (_, word)| sum.wrapping_add(BigEndian::read_u32(word)))
        .wrapping_neg()
}

/// Word sum over the whole block; zero for a block with a valid checksum.
pub fn word_sum(buf: &[u8]) -> u32 {
    buf.chunks_exact(4)
        .fold(0u32, |sum, word| sum.wrapping_add(BigEndian::read_u32(word)))
}

/// Boot record checksum: add-with-carry over every word except word 1,
/// then inverted.
pub fn boot_checksum(buf: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    for (i, word) in buf.chunks_exact(4).enumerate() {
        if i == 1 {
            continue;
        }
        let (next, carry) = sum.overflowing_add(BigEndian::read_u32(word));
        sum = next.wrapping_add(carry as u32);
    }
    !sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_zeroes_word_sum() {
        let mut buf = vec![0u8; 512];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = (i * 7) as u8;
        }
        let sum = block_checksum(&buf, 20);
        BigEndian::write_u32(&mut buf[20..], sum);
        assert_eq!(word_sum(&buf), 0);
    }

    #[test]
    fn checksum_ignores_stored_value() {
        let mut buf = vec![0u8; 512];
        buf[0] = 2;
        let first = block_checksum(&buf, 20);
        BigEndian::write_u32(&mut buf[20..], 0xDEAD_BEEF);
        assert_eq!(block_checksum(&buf, 20), first);
        assert_eq!(first, 0xFE00_0000);
    }

    #[test]
    fn boot_checksum_of_blank_record() {
        let buf = vec![0u8; 1024];
        assert_eq!(boot_checksum(&buf), 0xFFFF_FFFF);
    }
}
