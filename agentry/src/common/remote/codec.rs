/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Newline framing for link traffic.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// A decoded line, or the reason a line was dropped.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    Line(String),
    Oversize,
    NotUtf8,
}

/// Line framing that drops bad lines instead of ending the stream.
///
/// `FramedRead` stops for good after its decoder returns an error, so the
/// per-line failures of [`LinesCodec`] are turned into [`Inbound`] items. An
/// oversize line is skipped up to its terminating newline.
#[derive(Debug, Clone)]
pub(crate) struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    pub(crate) fn new(max_frame_size: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_frame_size),
        }
    }

    fn recover(
        decoded: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Inbound>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(Inbound::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Inbound::Oversize)),
            // LinesCodec only reports InvalidData for a line that is not UTF-8;
            // the line has already been consumed.
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Inbound::NotUtf8))
            }
            Err(e) => Err(e),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Inbound;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, LinesCodecError> {
        Self::recover(self.lines.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>, LinesCodecError> {
        Self::recover(self.lines.decode_eof(src))
    }
}

impl Encoder<String> for FrameCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), LinesCodecError> {
        self.lines.encode(line, dst)
    }
}
