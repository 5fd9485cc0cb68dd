//! Operator and sequence instructions

use super::Runner;
use crate::error::{InkError, Result};
use crate::types::command::Command;
use crate::types::list::ListValue;
use crate::types::value::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn list_operand(value: Value, ip: usize) -> Result<ListValue> {
    match value {
        Value::List(list) => Ok(list),
        other => Err(InkError::runtime(
            ip,
            format!("expected a list, found {}", other.kind()),
        )),
    }
}

/// Bound of a list range: an int, or a list standing for its extreme value.
fn range_bound(value: &Value, low: bool, ip: usize) -> Result<i32> {
    match value {
        Value::List(list) if low => Ok(list.min_value().unwrap_or(0)),
        Value::List(list) => Ok(list.max_value().unwrap_or(0)),
        other => other
            .as_int()
            .ok_or_else(|| InkError::runtime(ip, format!("invalid range bound {}", other.kind()))),
    }
}

impl Runner {
    pub(super) fn binary(&mut self, command: Command, ip: usize) -> Result<()> {
        let rhs = self.pop(ip)?;
        let lhs = self.pop(ip)?;
        let result = match command {
            Command::Add => lhs.add(&rhs),
            Command::Subtract => lhs.sub(&rhs),
            Command::Divide => lhs.div(&rhs),
            Command::Multiply => lhs.mul(&rhs),
            Command::Mod => lhs.rem(&rhs),
            Command::Random => match (lhs.as_int(), rhs.as_int()) {
                (Some(min), Some(max)) => Ok(Value::Int(self.state.rng.range(min, max))),
                _ => Err("RANDOM needs numeric bounds".to_string()),
            },
            Command::IsEqual => Ok(Value::Bool(lhs.equals(&rhs))),
            Command::NotEqual => Ok(Value::Bool(!lhs.equals(&rhs))),
            Command::GreaterThan => lhs.greater_than(&rhs),
            Command::LessThan => lhs.less_than(&rhs),
            Command::GreaterThanOrEquals => lhs.greater_or_equal(&rhs),
            Command::LessThanOrEquals => lhs.less_or_equal(&rhs),
            Command::And => Ok(Value::Bool(lhs.is_truthy() && rhs.is_truthy())),
            Command::Or => Ok(Value::Bool(lhs.is_truthy() || rhs.is_truthy())),
            Command::Min => lhs.min(&rhs),
            Command::Max => lhs.max(&rhs),
            Command::Has => lhs.has(&rhs).map(Value::Bool),
            Command::Hasnt => lhs.has(&rhs).map(|has| Value::Bool(!has)),
            Command::Intersection => lhs.intersect(&rhs),
            Command::ListInt => match (&lhs, rhs.as_int()) {
                (Value::List(list), Some(value)) => Ok(Value::List(list.item_with_value(value))),
                _ => Err(format!("cannot index {} by {}", lhs.kind(), rhs.kind())),
            },
            other => Err(format!("{other:?} is not a binary operator")),
        }
        .map_err(|reason| InkError::runtime(ip, reason))?;
        self.push(result);
        Ok(())
    }

    pub(super) fn unary(&mut self, command: Command, ip: usize) -> Result<()> {
        let operand = self.pop(ip)?;
        let result = match command {
            Command::Not => Value::Bool(!operand.is_truthy()),
            Command::Negate => operand.negate().map_err(|r| InkError::runtime(ip, r))?,
            Command::Floor => operand.floor().map_err(|r| InkError::runtime(ip, r))?,
            Command::Ceiling => operand.ceiling().map_err(|r| InkError::runtime(ip, r))?,
            Command::IntCast => operand.to_int().map_err(|r| InkError::runtime(ip, r))?,
            Command::FloatCast => operand.to_float().map_err(|r| InkError::runtime(ip, r))?,
            Command::ListCount => Value::Int(list_operand(operand, ip)?.len() as i32),
            Command::ListMin => Value::List(list_operand(operand, ip)?.single_min()),
            Command::ListMax => Value::List(list_operand(operand, ip)?.single_max()),
            Command::ListAll => Value::List(list_operand(operand, ip)?.all()),
            Command::ListInvert => Value::List(list_operand(operand, ip)?.invert()),
            Command::ListValue => Value::Int(list_operand(operand, ip)?.max_value().unwrap_or(0)),
            Command::ListRandom => {
                let list = list_operand(operand, ip)?;
                let picked = if list.is_empty() {
                    list
                } else {
                    let index = self.state.rng.range(0, list.len() as i32 - 1) as usize;
                    let item = list.items().iter().nth(index).copied();
                    match item {
                        Some(item) => list.only(item),
                        None => list,
                    }
                };
                Value::List(picked)
            }
            Command::ReadCountVar | Command::Turns => {
                let Value::Divert(address) = operand else {
                    return Err(InkError::runtime(
                        ip,
                        format!("{command:?} needs a divert target, found {}", operand.kind()),
                    ));
                };
                let container = self.story.container_starting_at(address as usize);
                if command == Command::ReadCountVar {
                    let count = container
                        .and_then(|id| self.state.visits.get(id as usize))
                        .copied()
                        .unwrap_or(0);
                    Value::Int(count as i32)
                } else {
                    let since = container
                        .and_then(|id| self.state.turn_visited.get(id as usize).copied().flatten())
                        .map_or(-1, |turn| (self.state.turn - turn) as i32);
                    Value::Int(since)
                }
            }
            other => {
                return Err(InkError::runtime(ip, format!("{other:?} is not a unary operator")));
            }
        };
        self.push(result);
        Ok(())
    }

    /// `list min max` on the stack, leaving the flags within the bounds.
    pub(super) fn list_range(&mut self, ip: usize) -> Result<()> {
        let max = self.pop(ip)?;
        let min = self.pop(ip)?;
        let list = list_operand(self.pop(ip)?, ip)?;
        let (min, max) = (range_bound(&min, true, ip)?, range_bound(&max, false, ip)?);
        self.push(Value::List(list.range(min, max)));
        Ok(())
    }

    /// Shuffled sequence: pops the element count and the sequence's visit
    /// count, pushes the element to show. Every loop of `count` visits shows
    /// each element once.
    pub(super) fn shuffle_index(&mut self, ip: usize) -> Result<()> {
        let elements = self.pop(ip)?.as_int().unwrap_or(0);
        let visits = self.pop(ip)?.as_int().unwrap_or(0);
        if visits < 0 {
            return Err(InkError::runtime(
                ip,
                format!("shuffle sequence visited {visits} times"),
            ));
        }
        if elements <= 0 {
            self.push(Value::Int(0));
            return Ok(());
        }
        let loop_index = (visits / elements) as u64;
        let iteration = (visits % elements) as usize;
        let container = self.state.containers.last().copied().unwrap_or(0) as u64;
        let seed = self
            .state
            .rng
            .seed
            .wrapping_add(container << 32)
            .wrapping_add(loop_index);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut unpicked: Vec<i32> = (0..elements).collect();
        let mut chosen = 0;
        for _ in 0..=iteration.min(unpicked.len() - 1) {
            let pick = rng.gen_range(0..unpicked.len());
            chosen = unpicked.remove(pick);
        }
        self.push(Value::Int(chosen));
        Ok(())
    }
}
