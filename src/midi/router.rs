// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Validation and encoding of MIDI messages injected by callers.

use tracing::trace;

use super::{check_range, messages, ChannelMessage, RangeError, BANK_RANGE, CHANNEL_RANGE, DATA_RANGE};

/// Status byte range accepted from callers
const STATUS_RANGE: std::ops::RangeInclusive<i32> = 0x80..=0xFF;

/// Encode a short message.
///
/// Returns `Ok(None)` for system and real-time messages, which are
/// accepted but never forwarded.
pub fn short_event(status: i32, data1: i32, data2: i32) -> Result<Option<Vec<u8>>, RangeError> {
    let status = check_range("status", status, STATUS_RANGE)? as u8;
    let data1 = check_range("data1", data1, DATA_RANGE)? as u8;
    let data2 = check_range("data2", data2, DATA_RANGE)? as u8;

    if status >= messages::SYSEX_START {
        trace!("Dropping system message 0x{:02X}", status);
        return Ok(None);
    }

    let bytes = match status & 0xF0 {
        messages::PROGRAM_CHANGE | messages::CHANNEL_AFTERTOUCH => vec![status, data1],
        _ => vec![status, data1, data2],
    };
    Ok(Some(bytes))
}

/// Bounds-check a long message and return the slice to forward
pub fn long_event(data: &[u8], offset: i32, length: i32) -> Result<&[u8], RangeError> {
    let out_of_bounds = RangeError::OutOfBounds {
        offset: offset as i64,
        length: length as i64,
        size: data.len(),
    };
    if offset < 0 || length < 0 {
        return Err(out_of_bounds);
    }
    let start = offset as usize;
    let end = start.checked_add(length as usize).ok_or(out_of_bounds.clone())?;
    if end > data.len() {
        return Err(out_of_bounds);
    }
    Ok(&data[start..end])
}

/// Program change with optional bank select.
///
/// A bank of -1 leaves the current bank alone. Otherwise bank select MSB and
/// LSB are sent ahead of the program change.
pub fn program_change(
    channel: i32,
    bank: i32,
    program: i32,
) -> Result<Vec<ChannelMessage>, RangeError> {
    let channel = check_range("channel", channel, CHANNEL_RANGE)? as u8;
    let program = check_range("program", program, DATA_RANGE)? as u8;
    if bank != -1 {
        check_range("bank", bank, BANK_RANGE)?;
    }

    let mut out = Vec::with_capacity(3);
    if bank != -1 {
        out.push(ChannelMessage::ControlChange {
            channel,
            controller: messages::CC_BANK_SELECT_MSB,
            value: (bank >> 7) as u8,
        });
        out.push(ChannelMessage::ControlChange {
            channel,
            controller: messages::CC_BANK_SELECT_LSB,
            value: (bank & 0x7F) as u8,
        });
    }
    out.push(ChannelMessage::ProgramChange { channel, program });
    Ok(out)
}

/// Channel volume controller message
pub fn channel_volume(channel: i32, volume: i32) -> Result<ChannelMessage, RangeError> {
    let channel = check_range("channel", channel, CHANNEL_RANGE)? as u8;
    let value = check_range("volume", volume, DATA_RANGE)? as u8;
    Ok(ChannelMessage::ControlChange {
        channel,
        controller: messages::CC_CHANNEL_VOLUME,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_event_lengths() {
        assert_eq!(short_event(0x90, 60, 100), Ok(Some(vec![0x90, 60, 100])));
        assert_eq!(short_event(0xC2, 10, 99), Ok(Some(vec![0xC2, 10])));
        assert_eq!(short_event(0xD0, 10, 0), Ok(Some(vec![0xD0, 10])));
        assert_eq!(short_event(0xB0, 7, 127), Ok(Some(vec![0xB0, 7, 127])));
    }

    #[test]
    fn test_short_event_drops_system_messages() {
        assert_eq!(short_event(0xF8, 0, 0), Ok(None));
        assert_eq!(short_event(0xFF, 0, 0), Ok(None));
        assert_eq!(short_event(0xF0, 1, 2), Ok(None));
    }

    #[test]
    fn test_short_event_ranges() {
        assert!(short_event(0x7F, 0, 0).is_err());
        assert!(short_event(0x100, 0, 0).is_err());
        assert!(short_event(0x90, 128, 0).is_err());
        assert!(short_event(0x90, 0, -1).is_err());
        // Range checks apply even to dropped messages
        assert!(short_event(0xF8, 200, 0).is_err());
    }

    #[test]
    fn test_long_event_bounds() {
        let data = [0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7];
        assert_eq!(long_event(&data, 0, 6), Ok(&data[..]));
        assert_eq!(long_event(&data, 2, 3), Ok(&data[2..5]));
        assert_eq!(long_event(&data, 6, 0), Ok(&data[6..]));
        assert!(long_event(&data, 4, 3).is_err());
        assert!(long_event(&data, -1, 2).is_err());
        assert!(long_event(&data, 0, -2).is_err());
        assert!(long_event(&data, i32::MAX, i32::MAX).is_err());
    }

    #[test]
    fn test_program_change_with_bank() {
        let messages = program_change(0, 5, 10).unwrap();
        assert_eq!(
            messages,
            vec![
                ChannelMessage::ControlChange { channel: 0, controller: 0x00, value: 0 },
                ChannelMessage::ControlChange { channel: 0, controller: 0x20, value: 5 },
                ChannelMessage::ProgramChange { channel: 0, program: 10 },
            ]
        );

        let messages = program_change(9, 16383, 0).unwrap();
        assert_eq!(messages[0], ChannelMessage::ControlChange { channel: 9, controller: 0, value: 127 });
        assert_eq!(messages[1], ChannelMessage::ControlChange { channel: 9, controller: 0x20, value: 127 });
    }

    #[test]
    fn test_program_change_without_bank() {
        let messages = program_change(3, -1, 42).unwrap();
        assert_eq!(messages, vec![ChannelMessage::ProgramChange { channel: 3, program: 42 }]);
    }

    #[test]
    fn test_program_change_ranges() {
        assert!(program_change(16, -1, 0).is_err());
        assert!(program_change(0, 16384, 0).is_err());
        assert!(program_change(0, -2, 0).is_err());
        assert!(program_change(0, -1, 128).is_err());
    }

    #[test]
    fn test_channel_volume() {
        assert_eq!(
            channel_volume(2, 100),
            Ok(ChannelMessage::ControlChange { channel: 2, controller: 7, value: 100 })
        );
        assert!(channel_volume(2, 128).is_err());
    }
}
