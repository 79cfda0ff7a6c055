// Copyright 2019 CoreOS, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Calendar arithmetic for `BootFile`/snapshot-member timestamp
//! truncation (spec.md §3: "truncated to 2-second granularity and
//! floored at 1980"), matching the resolution a PKZIP DOS timestamp can
//! represent. No calendar crate is in the teacher's dependency graph for
//! this, so this uses the standard days-since-epoch<->civil-date
//! conversion (Hinnant, public domain) rather than pulling one in.

const SECS_PER_DAY: i64 = 86_400;

fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (m as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

pub(crate) fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Truncates a unix timestamp to 2-second resolution, flooring the year
/// component at 1980 (month/day/time-of-day are otherwise preserved).
pub fn truncate(unix: i64) -> i64 {
    let days = unix.div_euclid(SECS_PER_DAY);
    let tod = unix.rem_euclid(SECS_PER_DAY);
    let (mut y, m, d) = civil_from_days(days);
    if y < 1980 {
        y = 1980;
    }
    let tod = tod - tod.rem_euclid(2);
    days_from_civil(y, m, d) * SECS_PER_DAY + tod
}

/// Splits a (2-second-truncated) unix timestamp into the calendar
/// fields a PKZIP DOS date-time needs.
pub(crate) fn to_ymdhms(unix: i64) -> (i64, u32, u32, u32, u32, u32) {
    let days = unix.div_euclid(SECS_PER_DAY);
    let tod = unix.rem_euclid(SECS_PER_DAY);
    let (y, m, d) = civil_from_days(days);
    let h = (tod / 3600) as u32;
    let mi = ((tod % 3600) / 60) as u32;
    let s = (tod % 60) as u32;
    (y, m, d, h, mi, s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_down_to_even_seconds() {
        assert_eq!(truncate(1), 0);
        assert_eq!(truncate(2), 2);
        assert_eq!(truncate(3), 2);
    }

    #[test]
    fn floors_year_at_1980() {
        // 1970-06-15T12:00:00Z, well before 1980.
        let unix = 5_000;
        let truncated = truncate(unix);
        let (y, m, d) = civil_from_days(truncated.div_euclid(SECS_PER_DAY));
        assert_eq!((y, m, d), (1980, 1, 1));
    }

    #[test]
    fn round_trips_a_recent_date() {
        // 2024-03-05T00:00:00Z
        let unix = 1_709_596_800;
        assert_eq!(truncate(unix), unix);
    }
}
