//! Typed reductions composed across the blocks of a round.
//!
//! Each block pushes collectives onto its own ordered list during a round.
//! At the end of `flush` the lists are matched positionally: entry `j` of
//! every local block is folded into the first block's entry, that partial
//! result is combined across ranks, and the global value is copied back to
//! every block.

use std::any::{Any, type_name};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::algs::communicator::{CommTag, Communicator};
use crate::block_error::BlockError;

/// Object-safe view of a communicator used by [`Collective::global`].
pub trait Gather {
    /// Every rank contributes `buf`; returns all contributions in rank order.
    fn gather_all(&self, buf: Bytes) -> Vec<Bytes>;
}

impl<C: Communicator> Gather for C {
    fn gather_all(&self, buf: Bytes) -> Vec<Bytes> {
        self.all_gather(CommTag::COLLECTIVE, buf)
    }
}

pub trait Collective: Send {
    /// Reset the running value to this block's own contribution.
    fn init(&mut self);
    /// Fold another local block's contribution into the running value.
    fn update(&mut self, other: &dyn Collective) -> Result<(), BlockError>;
    /// Combine running values across ranks.
    fn global(&mut self, comm: &dyn Gather) -> Result<(), BlockError>;
    /// Adopt the running value of `other`.
    fn copy_from(&mut self, other: &dyn Collective) -> Result<(), BlockError>;
    fn result(&self) -> &dyn Any;
    fn into_result(self: Box<Self>) -> Box<dyn Any>;
    fn as_any(&self) -> &dyn Any;
}

/// Binary reduction operator.
pub trait ReduceOp<T>: Send + 'static {
    fn combine(&self, a: &T, b: &T) -> T;
}

pub mod ops {
    use super::ReduceOp;

    #[derive(Clone, Copy, Debug, Default)]
    pub struct Maximum;
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Minimum;
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Sum;
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Product;
    #[derive(Clone, Copy, Debug, Default)]
    pub struct LogicalAnd;
    #[derive(Clone, Copy, Debug, Default)]
    pub struct LogicalOr;

    /// Any `Fn(&T, &T) -> T` as an operator.
    #[derive(Clone, Copy, Debug)]
    pub struct ReduceFn<F>(pub F);

    impl<T: PartialOrd + Clone> ReduceOp<T> for Maximum {
        fn combine(&self, a: &T, b: &T) -> T {
            if b > a { b.clone() } else { a.clone() }
        }
    }

    impl<T: PartialOrd + Clone> ReduceOp<T> for Minimum {
        fn combine(&self, a: &T, b: &T) -> T {
            if b < a { b.clone() } else { a.clone() }
        }
    }

    impl<T> ReduceOp<T> for Sum
    where
        T: Clone + std::ops::Add<Output = T>,
    {
        fn combine(&self, a: &T, b: &T) -> T {
            a.clone() + b.clone()
        }
    }

    impl<T> ReduceOp<T> for Product
    where
        T: Clone + std::ops::Mul<Output = T>,
    {
        fn combine(&self, a: &T, b: &T) -> T {
            a.clone() * b.clone()
        }
    }

    impl ReduceOp<bool> for LogicalAnd {
        fn combine(&self, a: &bool, b: &bool) -> bool {
            *a && *b
        }
    }

    impl ReduceOp<bool> for LogicalOr {
        fn combine(&self, a: &bool, b: &bool) -> bool {
            *a || *b
        }
    }

    impl<T, F> ReduceOp<T> for ReduceFn<F>
    where
        F: Fn(&T, &T) -> T + Send + 'static,
    {
        fn combine(&self, a: &T, b: &T) -> T {
            (self.0)(a, b)
        }
    }
}

/// Reduction of one value per block with `op`; every block reads back the
/// same global result.
pub struct AllReduce<T, Op> {
    input: T,
    output: T,
    op: Op,
}

impl<T: Clone, Op> AllReduce<T, Op> {
    pub fn new(value: T, op: Op) -> Self {
        Self {
            input: value.clone(),
            output: value,
            op,
        }
    }
}

impl<T, Op> AllReduce<T, Op>
where
    T: 'static,
    Op: 'static,
{
    fn peer<'o>(&self, other: &'o dyn Collective) -> Result<&'o Self, BlockError> {
        other
            .as_any()
            .downcast_ref::<Self>()
            .ok_or(BlockError::CollectiveTypeMismatch {
                gid: usize::MAX,
                expected: type_name::<T>(),
            })
    }
}

impl<T, Op> Collective for AllReduce<T, Op>
where
    T: Clone + Serialize + DeserializeOwned + Send + 'static,
    Op: ReduceOp<T>,
{
    fn init(&mut self) {
        self.output = self.input.clone();
    }

    fn update(&mut self, other: &dyn Collective) -> Result<(), BlockError> {
        let other = self.peer(other)?;
        self.output = self.op.combine(&self.output, &other.input);
        Ok(())
    }

    fn global(&mut self, comm: &dyn Gather) -> Result<(), BlockError> {
        let mine = Bytes::from(bincode::serialize(&self.output)?);
        let parts = comm.gather_all(mine);
        let mut acc: Option<T> = None;
        for part in parts {
            let v: T = bincode::deserialize(&part)?;
            acc = Some(match acc {
                None => v,
                Some(a) => self.op.combine(&a, &v),
            });
        }
        if let Some(v) = acc {
            self.output = v;
        }
        Ok(())
    }

    fn copy_from(&mut self, other: &dyn Collective) -> Result<(), BlockError> {
        self.output = self.peer(other)?.output.clone();
        Ok(())
    }

    fn result(&self) -> &dyn Any {
        &self.output
    }

    fn into_result(self: Box<Self>) -> Box<dyn Any> {
        Box::new(self.output)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A value parked on the block's collective list and handed back untouched.
pub struct Scratch<T>(pub T);

impl<T: Send + 'static> Collective for Scratch<T> {
    fn init(&mut self) {}
    fn update(&mut self, _other: &dyn Collective) -> Result<(), BlockError> {
        Ok(())
    }
    fn global(&mut self, _comm: &dyn Gather) -> Result<(), BlockError> {
        Ok(())
    }
    fn copy_from(&mut self, _other: &dyn Collective) -> Result<(), BlockError> {
        Ok(())
    }
    fn result(&self) -> &dyn Any {
        &self.0
    }
    fn into_result(self: Box<Self>) -> Box<dyn Any> {
        Box::new(self.0)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Compose entry `j` of every list: local fold, global combine, copy back.
///
/// All lists must have the same length; otherwise nothing is composed.
pub(crate) fn compose(
    lists: &mut [(usize, &mut std::collections::VecDeque<Box<dyn Collective>>)],
    comm: &dyn Gather,
) -> Result<(), BlockError> {
    let Some((_, first)) = lists.first() else {
        return Ok(());
    };
    let n = first.len();
    if let Some((gid, l)) = lists.iter().find(|(_, l)| l.len() != n) {
        return Err(BlockError::CollectiveCountMismatch {
            gid: *gid,
            expected: n,
            found: l.len(),
        });
    }
    let tag = |gid: usize, e: BlockError| match e {
        BlockError::CollectiveTypeMismatch { expected, .. } => {
            BlockError::CollectiveTypeMismatch { gid, expected }
        }
        e => e,
    };
    for j in 0..n {
        let Some(((_, head), rest)) = lists.split_first_mut() else {
            break;
        };
        head[j].init();
        for (gid, l) in rest.iter() {
            head[j].update(&*l[j]).map_err(|e| tag(*gid, e))?;
        }
        head[j].global(comm)?;
        for (gid, l) in rest.iter_mut() {
            l[j].copy_from(&*head[j]).map_err(|e| tag(*gid, e))?;
        }
    }
    Ok(())
}
