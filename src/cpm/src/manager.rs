//! Ranking of bound pools by usage.
//!
//! Bound pools sit on a doubly linked list threaded through the pool array
//! by index. The list is kept ordered so that, for each adjacent pair, a
//! pool with room comes before every full pool and before any pool with
//! fewer records in use. The head is therefore the fullest pool that still
//! has room, which is the pool new allocations should go to.
//!
//! A usage change only moves the affected pool, one neighbour at a time,
//! until its neighbours are in order again.
use std::fmt;

use crate::cmm::{Allocation, SubAllocator};
use crate::error::{Error, Result};
use crate::log;

pub type PoolId = u16;

/// Cursor control for [`Cpm::iterate_bound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    First,
    Next,
}

/// Usage of one bound pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolInfo {
    pub id: PoolId,
    pub used_count: u32,
    pub all_used: bool,
}

struct Pool<A> {
    alloc: Option<A>,
    used_count: u32,
    all_used: bool,
    prev: Option<PoolId>,
    next: Option<PoolId>,
}

impl<A> Pool<A> {
    fn unbound() -> Self {
        Pool {
            alloc: None,
            used_count: 0,
            all_used: false,
            prev: None,
            next: None,
        }
    }
}

pub struct Cpm<A> {
    pools: Vec<Pool<A>>,
    head: Option<PoolId>,
    tail: Option<PoolId>,
    available: Option<PoolId>,
    pool_capacity: u32,
    cursor: usize,
}

impl<A> fmt::Debug for Cpm<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpm")
            .field("max_pools", &self.pools.len())
            .field("pool_capacity", &self.pool_capacity)
            .field("available", &self.available)
            .field("ranked", &self.iter_ranked().collect::<Vec<_>>())
            .finish()
    }
}

impl<A> Cpm<A> {
    pub fn open(max_pools: usize) -> Result<Self> {
        if max_pools == 0 || max_pools > PoolId::MAX as usize + 1 {
            return Err(Error::InvalidPoolCount(max_pools));
        }
        Ok(Cpm {
            pools: (0..max_pools).map(|_| Pool::unbound()).collect(),
            head: None,
            tail: None,
            available: None,
            pool_capacity: 0,
            cursor: 0,
        })
    }

    /// Hands back every allocator still bound so it can be released.
    pub fn close(self) -> Vec<(PoolId, A)> {
        self.pools
            .into_iter()
            .enumerate()
            .filter_map(|(i, p)| p.alloc.map(|a| (i as PoolId, a)))
            .collect()
    }

    #[inline]
    pub fn max_pools(&self) -> usize {
        self.pools.len()
    }

    pub fn set_pool_capacity(&mut self, capacity: u32) {
        self.pool_capacity = capacity;
    }

    #[inline]
    pub fn pool_capacity(&self) -> u32 {
        self.pool_capacity
    }

    fn check(&self, pool: PoolId) -> Result<()> {
        if pool as usize >= self.pools.len() {
            return Err(Error::InvalidPool {
                pool,
                max: self.pools.len(),
            });
        }
        Ok(())
    }

    #[inline]
    fn at(&self, pool: PoolId) -> &Pool<A> {
        &self.pools[pool as usize]
    }

    #[inline]
    fn at_mut(&mut self, pool: PoolId) -> &mut Pool<A> {
        &mut self.pools[pool as usize]
    }

    /// Whether `a` has to be ranked in front of `b`.
    fn precedes(&self, a: PoolId, b: PoolId) -> bool {
        let (a, b) = (self.at(a), self.at(b));
        !a.all_used && (b.all_used || a.used_count > b.used_count)
    }

    /// Binds `alloc` to `pool`, or unbinds it when `alloc` is `None`.
    /// Returns the allocator previously bound.
    pub fn bind(&mut self, pool: PoolId, alloc: Option<A>) -> Result<Option<A>> {
        self.check(pool)?;
        match alloc {
            Some(alloc) => {
                if self.at(pool).alloc.is_some() {
                    return Err(Error::AlreadyBound(pool));
                }
                *self.at_mut(pool) = Pool::unbound();
                self.at_mut(pool).alloc = Some(alloc);
                self.insert_ranked(pool);
                log::trace!("pool {} bound", pool);
                self.refresh_available();
                Ok(None)
            }
            None => {
                if self.at(pool).alloc.is_none() {
                    return Ok(None);
                }
                self.unlink(pool);
                let prev = std::mem::replace(self.at_mut(pool), Pool::unbound()).alloc;
                log::trace!("pool {} unbound", pool);
                self.refresh_available();
                Ok(prev)
            }
        }
    }

    pub fn is_bound(&self, pool: PoolId) -> bool {
        (pool as usize) < self.pools.len() && self.at(pool).alloc.is_some()
    }

    pub fn get_bound_allocator(&self, pool: PoolId) -> Result<&A> {
        self.check(pool)?;
        self.at(pool).alloc.as_ref().ok_or(Error::NotBound(pool))
    }

    pub fn get_bound_allocator_mut(&mut self, pool: PoolId) -> Result<&mut A> {
        self.check(pool)?;
        self.at_mut(pool).alloc.as_mut().ok_or(Error::NotBound(pool))
    }

    /// The fullest pool that still has room.
    #[inline]
    pub fn get_available_pool(&self) -> Option<PoolId> {
        self.available
    }

    pub fn pool_info(&self, pool: PoolId) -> Result<PoolInfo> {
        self.check(pool)?;
        let p = self.at(pool);
        if p.alloc.is_none() {
            return Err(Error::NotBound(pool));
        }
        Ok(PoolInfo {
            id: pool,
            used_count: p.used_count,
            all_used: p.all_used,
        })
    }

    /// Records the usage of `pool` and moves it to its rank.
    pub fn set_usage(&mut self, pool: PoolId, used_count: u32, all_used: bool) -> Result<()> {
        self.check(pool)?;
        if self.at(pool).alloc.is_none() {
            return Err(Error::NotBound(pool));
        }
        if used_count > self.pool_capacity {
            return Err(Error::UsageExceedsCapacity {
                used: used_count,
                capacity: self.pool_capacity,
            });
        }
        {
            let p = self.at_mut(pool);
            p.used_count = used_count;
            p.all_used = all_used;
        }

        while let Some(prev) = self.at(pool).prev {
            if !self.precedes(pool, prev) {
                break;
            }
            self.unlink(pool);
            self.link_before(pool, prev);
        }
        while let Some(next) = self.at(pool).next {
            if !self.precedes(next, pool) {
                break;
            }
            self.unlink(pool);
            self.link_after(pool, next);
        }
        self.refresh_available();
        Ok(())
    }

    /// Restartable walk over bound pools in index order.
    pub fn iterate_bound(&mut self, mode: SearchMode) -> Option<(PoolId, &A)> {
        if mode == SearchMode::First {
            self.cursor = 0;
        }
        let found = (self.cursor..self.pools.len()).find(|&i| self.pools[i].alloc.is_some());
        match found {
            Some(i) => {
                self.cursor = i + 1;
                self.pools[i].alloc.as_ref().map(|a| (i as PoolId, a))
            }
            None => {
                self.cursor = self.pools.len();
                None
            }
        }
    }

    pub fn iter_bound(&self) -> impl Iterator<Item = (PoolId, &A)> {
        self.pools
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.alloc.as_ref().map(|a| (i as PoolId, a)))
    }

    /// Bound pools from head to tail.
    pub fn iter_ranked(&self) -> Ranked<'_, A> {
        Ranked {
            cpm: self,
            cur: self.head,
        }
    }

    fn refresh_available(&mut self) {
        self.available = self.head.filter(|&h| !self.at(h).all_used);
    }

    fn insert_ranked(&mut self, pool: PoolId) {
        let mut cur = self.head;
        while let Some(c) = cur {
            if self.precedes(pool, c) {
                self.link_before(pool, c);
                return;
            }
            cur = self.at(c).next;
        }
        self.link_tail(pool);
    }

    fn link_tail(&mut self, pool: PoolId) {
        let tail = self.tail;
        {
            let p = self.at_mut(pool);
            p.prev = tail;
            p.next = None;
        }
        match tail {
            Some(t) => self.at_mut(t).next = Some(pool),
            None => self.head = Some(pool),
        }
        self.tail = Some(pool);
    }

    fn link_before(&mut self, pool: PoolId, at: PoolId) {
        let prev = self.at(at).prev;
        {
            let p = self.at_mut(pool);
            p.prev = prev;
            p.next = Some(at);
        }
        self.at_mut(at).prev = Some(pool);
        match prev {
            Some(pr) => self.at_mut(pr).next = Some(pool),
            None => self.head = Some(pool),
        }
    }

    fn link_after(&mut self, pool: PoolId, at: PoolId) {
        match self.at(at).next {
            Some(next) => self.link_before(pool, next),
            None => self.link_tail(pool),
        }
    }

    fn unlink(&mut self, pool: PoolId) {
        let (prev, next) = {
            let p = self.at_mut(pool);
            (p.prev.take(), p.next.take())
        };
        match prev {
            Some(pr) => self.at_mut(pr).next = next,
            None => self.head = next,
        }
        match next {
            Some(nx) => self.at_mut(nx).prev = prev,
            None => self.tail = prev,
        }
    }
}

impl<A: SubAllocator> Cpm<A> {
    /// Allocates `count` records from `pool` and re-ranks it.
    pub fn alloc_from(&mut self, pool: PoolId, count: u32) -> Result<Allocation> {
        let a = self.get_bound_allocator_mut(pool)?.alloc(count)?;
        self.set_usage(pool, a.usage.used, a.usage.all_used)?;
        Ok(a)
    }

    /// Frees `count` records at `offset` in `pool` and re-ranks it.
    pub fn free_to(&mut self, pool: PoolId, offset: u32, count: u32) -> Result<()> {
        let usage = self.get_bound_allocator_mut(pool)?.free(offset, count)?;
        self.set_usage(pool, usage.used, usage.all_used)
    }
}

pub struct Ranked<'a, A> {
    cpm: &'a Cpm<A>,
    cur: Option<PoolId>,
}

impl<'a, A> Iterator for Ranked<'a, A> {
    type Item = PoolInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let p = self.cpm.at(id);
        self.cur = p.next;
        Some(PoolInfo {
            id,
            used_count: p.used_count,
            all_used: p.all_used,
        })
    }
}
