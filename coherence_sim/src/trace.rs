//! Memory-access traces.
//!
//! One access per line: `<kind> <hex-address> <thread-id>`, where kind is one
//! of `r R w W`. Blank lines and lines starting with `#` are skipped.

use nom::{
    bytes::complete::tag_no_case,
    character::complete::{hex_digit1, one_of, space0, space1, u32},
    combinator::{all_consuming, map, map_res, opt},
    sequence::{preceded, terminated, tuple},
    IResult,
};
use thiserror::Error;

use crate::common::{AccessKind, Job};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TraceError {
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },
}

fn kind(input: &str) -> IResult<&str, AccessKind> {
    map(one_of("rRwW"), |c| match c {
        'r' | 'R' => AccessKind::Read,
        _ => AccessKind::Write,
    })(input)
}

fn address(input: &str) -> IResult<&str, u64> {
    map_res(preceded(opt(tag_no_case("0x")), hex_digit1), |s| {
        u64::from_str_radix(s, 16)
    })(input)
}

fn job(input: &str) -> IResult<&str, Job> {
    map(
        all_consuming(terminated(
            tuple((preceded(space0, kind), preceded(space1, address), preceded(space1, u32))),
            space0,
        )),
        |(kind, addr, thread_id)| Job::new(kind, addr, thread_id),
    )(input)
}

pub fn parse_line(line: &str) -> Result<Option<Job>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    match job(trimmed) {
        Ok((_, job)) => Ok(Some(job)),
        Err(e) => Err(format!("malformed access `{trimmed}`: {e}")),
    }
}

pub fn parse_trace(src: &str) -> Result<Vec<Job>, TraceError> {
    let mut jobs = Vec::new();
    for (i, line) in src.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(job)) => jobs.push(job),
            Ok(None) => {}
            Err(msg) => return Err(TraceError::Parse { line: i + 1, msg }),
        }
    }
    log::info!("{} accesses read from trace", jobs.len());
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace() {
        let src = "\
# two threads
r 0x1000 0
W 1a2b 1

  R 0XFF 12
w 0xffffffffffffffff 3
";
        let jobs = parse_trace(src).unwrap();
        assert_eq!(
            jobs,
            vec![
                Job::read(0x1000, 0),
                Job::write(0x1a2b, 1),
                Job::read(0xff, 12),
                Job::write(u64::MAX, 3),
            ]
        );
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        for (src, line) in [
            ("r 0x10 0\nx 0x10 0\n", 2),
            ("r 0x10\n", 1),
            ("r 0x10 0 extra\n", 1),
            ("\n\nw 0xzz 1\n", 3),
            ("r 0x1ffffffffffffffff 0\n", 1),
            ("r 0x10 -1\n", 1),
        ] {
            match parse_trace(src) {
                Err(TraceError::Parse { line: l, .. }) => assert_eq!(l, line, "{src:?}"),
                Ok(jobs) => panic!("{src:?} parsed as {jobs:?}"),
            }
        }
    }

    #[test]
    fn test_empty_trace() {
        assert_eq!(parse_trace(""), Ok(vec![]));
        assert_eq!(parse_trace("# nothing\n\n"), Ok(vec![]));
    }
}
