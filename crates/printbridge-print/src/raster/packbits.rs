// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// TIFF PackBits run-length encoding, as accepted by QL firmware in
// compressed raster mode.
//
// Header byte n: 0..=127 copies the next n+1 bytes literally; 129..=255
// (i.e. -127..=-1) repeats the next byte 1-n times.

const MAX_RUN: usize = 127;

#[derive(PartialEq)]
enum State {
    Literal,
    Run,
}

/// Encode one raster line.
///
/// The output is byte-for-byte what the reference Python `packbits` module
/// produces; firmware that rejects a frame prints garbage instead of
/// failing, so the exact choice of runs matters.
pub fn encode(data: &[u8]) -> Vec<u8> {
    match data.len() {
        0 => return Vec::new(),
        1 => return vec![0x00, data[0]],
        _ => {}
    }

    let mut out = Vec::with_capacity(data.len() + data.len() / MAX_RUN + 1);
    let mut literal: Vec<u8> = Vec::with_capacity(MAX_RUN);
    let mut state = State::Literal;
    let mut repeat = 0usize;
    let mut pos = 0;

    let flush_literal = |out: &mut Vec<u8>, literal: &mut Vec<u8>| {
        if !literal.is_empty() {
            out.push((literal.len() - 1) as u8);
            out.extend_from_slice(literal);
            literal.clear();
        }
    };
    let flush_run = |out: &mut Vec<u8>, repeat: usize, byte: u8| {
        out.push((256 - (repeat - 1)) as u8);
        out.push(byte);
    };

    while pos < data.len() - 1 {
        let current = data[pos];
        if current == data[pos + 1] {
            match state {
                State::Literal => {
                    flush_literal(&mut out, &mut literal);
                    state = State::Run;
                    repeat = 1;
                }
                State::Run => {
                    if repeat == MAX_RUN {
                        flush_run(&mut out, repeat, current);
                        repeat = 0;
                    }
                    repeat += 1;
                }
            }
        } else {
            match state {
                State::Run => {
                    repeat += 1;
                    flush_run(&mut out, repeat, current);
                    state = State::Literal;
                    repeat = 0;
                }
                State::Literal => {
                    if literal.len() == MAX_RUN {
                        flush_literal(&mut out, &mut literal);
                    }
                    literal.push(current);
                }
            }
        }
        pos += 1;
    }

    if state == State::Literal {
        literal.push(data[pos]);
        flush_literal(&mut out, &mut literal);
    } else {
        repeat += 1;
        flush_run(&mut out, repeat, data[pos]);
    }
    out
}
