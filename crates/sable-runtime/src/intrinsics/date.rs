//! Date operations. Component getters read UTC to keep program output
//! independent of the host timezone.

use std::rc::Rc;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::error::{VmError, VmResult};
use crate::value::{DateData, Value};
use crate::vm::Vm;

use super::{arg, to_num};

fn recv(args: &[Value]) -> VmResult<Rc<DateData>> {
    match args.first() {
        Some(Value::Date(d)) => Ok(d.clone()),
        _ => Err(VmError::type_error("Receiver is not a Date")),
    }
}

fn now_millis() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

fn datetime(millis: f64) -> Option<DateTime<Utc>> {
    if !millis.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// ISO-8601 string with millisecond precision, or `None` for an invalid
/// date
pub fn to_iso_string(millis: f64) -> Option<String> {
    datetime(millis).map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

pub fn new_date(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let millis = match args.len() {
        0 => now_millis(),
        1 => match &args[0] {
            Value::Str(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp_millis() as f64)
                .unwrap_or(f64::NAN),
            v => to_num(vm, v)?,
        },
        _ => {
            let year = to_num(vm, &arg(args, 0))? as i32;
            let month = to_num(vm, &arg(args, 1))? as u32;
            let day = match arg(args, 2) {
                Value::Undefined => 1,
                v => to_num(vm, &v)? as u32,
            };
            let hour = match arg(args, 3) {
                Value::Undefined => 0,
                v => to_num(vm, &v)? as u32,
            };
            let minute = match arg(args, 4) {
                Value::Undefined => 0,
                v => to_num(vm, &v)? as u32,
            };
            let second = match arg(args, 5) {
                Value::Undefined => 0,
                v => to_num(vm, &v)? as u32,
            };
            Utc.with_ymd_and_hms(year, month + 1, day, hour, minute, second)
                .single()
                .map(|dt| dt.timestamp_millis() as f64)
                .unwrap_or(f64::NAN)
        }
    };
    Ok(Value::Date(Rc::new(DateData {
        millis: std::cell::Cell::new(millis),
    })))
}

/// `Date()` without `new` returns the current time as a string
pub fn date_call(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = (vm, args);
    Ok(Value::str(
        to_iso_string(now_millis()).unwrap_or_else(|| "Invalid Date".into()),
    ))
}

pub fn now(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = (vm, args);
    Ok(Value::Number(now_millis()))
}

pub fn get_time(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    Ok(Value::Number(recv(args)?.millis.get()))
}

fn component(args: &[Value], f: impl Fn(DateTime<Utc>) -> f64) -> VmResult<Value> {
    let d = recv(args)?;
    Ok(match datetime(d.millis.get()) {
        Some(dt) => Value::Number(f(dt)),
        None => Value::Number(f64::NAN),
    })
}

pub fn get_full_year(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    component(args, |dt| dt.year() as f64)
}

pub fn get_month(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    component(args, |dt| (dt.month() - 1) as f64)
}

pub fn get_date(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    component(args, |dt| dt.day() as f64)
}

pub fn get_day(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    component(args, |dt| dt.weekday().num_days_from_sunday() as f64)
}

pub fn get_hours(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    component(args, |dt| dt.hour() as f64)
}

pub fn get_minutes(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    component(args, |dt| dt.minute() as f64)
}

pub fn get_seconds(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    component(args, |dt| dt.second() as f64)
}

pub fn get_milliseconds(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    component(args, |dt| dt.timestamp_subsec_millis() as f64)
}

pub fn to_iso(vm: &mut Vm, args: &[Value]) -> VmResult<Value> {
    let _ = vm;
    let d = recv(args)?;
    match to_iso_string(d.millis.get()) {
        Some(s) => Ok(Value::str(s)),
        None => Err(VmError::range_error("Invalid time value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Vm;

    #[test]
    fn construct_from_components() {
        let mut vm = Vm::for_tests();
        // new Date(2020, 0, 15) — January is month 0
        let d = new_date(
            &mut vm,
            &[Value::Number(2020.0), Value::Number(0.0), Value::Number(15.0)],
        )
        .unwrap();
        let year = get_full_year(&mut vm, &[d.clone()]).unwrap();
        assert_eq!(year.as_number(), Some(2020.0));
        let month = get_month(&mut vm, &[d.clone()]).unwrap();
        assert_eq!(month.as_number(), Some(0.0));
        let day = get_date(&mut vm, &[d]).unwrap();
        assert_eq!(day.as_number(), Some(15.0));
    }

    #[test]
    fn iso_roundtrip() {
        let mut vm = Vm::for_tests();
        let d = new_date(&mut vm, &[Value::str("2021-03-04T05:06:07.008Z")]).unwrap();
        let iso = to_iso(&mut vm, &[d]).unwrap();
        assert_eq!(iso.as_str(), Some("2021-03-04T05:06:07.008Z"));
    }

    #[test]
    fn invalid_date_components_are_nan() {
        let mut vm = Vm::for_tests();
        let d = new_date(&mut vm, &[Value::str("not a date")]).unwrap();
        let t = get_time(&mut vm, &[d]).unwrap();
        assert!(t.as_number().unwrap().is_nan());
    }
}
