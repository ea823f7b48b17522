//! AAC configuration parsing
//!
//! RTMP carries AAC as raw access units with an AudioSpecificConfig sent
//! once as the sequence header. Some encoders push ADTS framed audio instead,
//! in which case the configuration is recovered from the ADTS header.
//!
//! AudioSpecificConfig (first two bytes):
//! ```text
//! audioObjectType (5) | samplingFrequencyIndex (4) | channelConfiguration (4) | ...
//! ```

use crate::error::ConfigParseError;

/// Sampling rates indexed by samplingFrequencyIndex
pub const SAMPLING_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Fixed ADTS header size without CRC
const ADTS_HEADER_LEN: usize = 7;

/// Look up a sampling rate; indices past the table map to 0
pub fn sampling_rate(index: u8) -> u32 {
    SAMPLING_RATES.get(index as usize).copied().unwrap_or(0)
}

/// Decoded audio configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioConfig {
    /// Audio object type (2 = AAC LC)
    pub object_type: u8,
    pub sampling_index: u8,
    /// 0 when the index is outside the standard table
    pub sampling_rate: u32,
    pub channel_config: u8,
}

impl AudioConfig {
    pub fn profile_name(&self) -> &'static str {
        match self.object_type {
            1 => "AAC Main",
            2 => "AAC LC",
            3 => "AAC SSR",
            4 => "AAC LTP",
            5 => "HE-AAC",
            29 => "HE-AACv2",
            _ => "Unknown",
        }
    }

    /// Serialize back to a 2-byte AudioSpecificConfig
    pub fn to_bytes(&self) -> [u8; 2] {
        [
            (self.object_type << 3) | ((self.sampling_index >> 1) & 0x07),
            ((self.sampling_index & 0x01) << 7) | ((self.channel_config & 0x0F) << 3),
        ]
    }
}

/// Parse the leading fields of an AudioSpecificConfig
pub fn parse_audio_config(data: &[u8]) -> Result<AudioConfig, ConfigParseError> {
    if data.len() < 2 {
        return Err(ConfigParseError::TooShort {
            needed: 2,
            actual: data.len(),
        });
    }

    let object_type = data[0] >> 3;
    let sampling_index = ((data[0] & 0x07) << 1) | (data[1] >> 7);
    let channel_config = (data[1] >> 3) & 0x0F;

    Ok(AudioConfig {
        object_type,
        sampling_index,
        sampling_rate: sampling_rate(sampling_index),
        channel_config,
    })
}

/// Fixed part of an ADTS frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    pub config: AudioConfig,
    /// Frame length including the header
    pub frame_length: u16,
    /// Header length: 7, or 9 when a CRC follows
    pub header_length: u8,
}

impl AdtsHeader {
    pub fn parse(data: &[u8]) -> Result<Self, ConfigParseError> {
        if data.len() < ADTS_HEADER_LEN {
            return Err(ConfigParseError::TooShort {
                needed: ADTS_HEADER_LEN,
                actual: data.len(),
            });
        }
        if data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return Err(ConfigParseError::MissingSyncWord);
        }

        let protection_absent = data[1] & 0x01 == 1;
        let object_type = (data[2] >> 6) + 1;
        let sampling_index = (data[2] >> 2) & 0x0F;
        let channel_config = ((data[2] & 0x01) << 2) | (data[3] >> 6);
        let frame_length =
            (((data[3] & 0x03) as u16) << 11) | ((data[4] as u16) << 3) | ((data[5] as u16) >> 5);

        Ok(AdtsHeader {
            config: AudioConfig {
                object_type,
                sampling_index,
                sampling_rate: sampling_rate(sampling_index),
                channel_config,
            },
            frame_length,
            header_length: if protection_absent { 7 } else { 9 },
        })
    }
}

/// Whether `data` starts with an ADTS sync word
pub fn is_adts(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && data[1] & 0xF0 == 0xF0
}
