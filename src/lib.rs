// nrbf-parser - A high-performance MS-NRBF binary parser.
// Copyright (C) 2026  driedpampas@proton.me
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! A high-performance MS-NRBF binary parser: decodes .NET Binary Format
//! streams into an inspectable [`Node`] tree, then optionally resolves
//! forward references (`backfill`) and minifies the result to the object
//! graph reachable from the stream's root (`crunch`).

pub mod backfill;
pub mod crunch;
pub mod decoder;
pub mod error;
pub mod node;
pub mod records;

pub use decoder::{DecodeOptions, Decoder, Decoded};
pub use error::Error;
pub use node::{to_json, Node};

/// Decodes a full NRBF stream from `reader` in one call.
pub fn parse<R: std::io::Read>(reader: R, options: DecodeOptions) -> error::Result<Decoded> {
    Decoder::new(reader, options).parse()
}
