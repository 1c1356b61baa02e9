//! Collective operations built on point-to-point messaging.
//!
//! Every helper here is *collective*: all ranks of the communicator must call
//! it, in the same order, with the same tag. Each helper drains every send
//! and receive handle it posted before returning, and runs both of its
//! phases even when the first one failed, so that a failure on one peer
//! never leaves another rank waiting or stale messages behind for the next
//! exchange.

use bytemuck::Pod;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireF64, WireLen, WireU64, cast_slice, decode_records};
use crate::matrix_error::MatrixError;

/// All-gather implemented with one size exchange followed by one data
/// exchange between every pair of ranks.
pub fn all_gather_bytes_p2p<C>(
    comm: &C,
    tag: CommTag,
    local: &[u8],
) -> Result<Vec<Vec<u8>>, MatrixError>
where
    C: Communicator + ?Sized,
{
    log::trace!(
        "rank {}: all-gather of {} bytes on tag {:?}",
        comm.rank(),
        local.len(),
        tag
    );
    exchange_p2p(comm, tag, local, |_| local)
}

/// Personalised exchange: `outgoing[p]` is sent to rank `p` only, and entry
/// `p` of the result is what rank `p` sent to this rank.
///
/// `outgoing` must have one buffer per rank; the own entry is returned
/// as is.
pub fn all_to_all_bytes_p2p<C>(
    comm: &C,
    tag: CommTag,
    outgoing: &[Vec<u8>],
) -> Result<Vec<Vec<u8>>, MatrixError>
where
    C: Communicator + ?Sized,
{
    let me = comm.rank();
    let buffer = |p: usize| outgoing.get(p).map_or(&[][..], Vec::as_slice);
    // Exchange even with a malformed argument, so peers are not left waiting.
    let out = exchange_p2p(comm, tag, buffer(me), buffer);
    if outgoing.len() != comm.size() {
        return Err(MatrixError::DimensionMismatch {
            left: outgoing.len(),
            right: comm.size(),
        });
    }
    out
}

/// Size phase on `tag`, payload phase on `tag + 1`. `payload(p)` is what
/// goes to peer `p`.
fn exchange_p2p<'a, C, F>(
    comm: &C,
    tag: CommTag,
    own: &[u8],
    payload: F,
) -> Result<Vec<Vec<u8>>, MatrixError>
where
    C: Communicator + ?Sized,
    F: Fn(usize) -> &'a [u8],
{
    let me = comm.rank();
    let n = comm.size();
    let peers: Vec<usize> = (0..n).filter(|&p| p != me).collect();

    // 1) sizes
    let size_tag = tag.as_u16();
    let mut header = [0u8; std::mem::size_of::<WireLen>()];
    let recv_sizes: Vec<(usize, C::RecvHandle)> = peers
        .iter()
        .map(|&p| (p, comm.irecv(p, size_tag, &mut header)))
        .collect();
    let lens: Vec<[WireLen; 1]> = peers
        .iter()
        .map(|&p| [WireLen::new(payload(p).len())])
        .collect();
    let sends: Vec<C::SendHandle> = peers
        .iter()
        .zip(&lens)
        .map(|(&p, len)| comm.isend(p, size_tag, cast_slice(len)))
        .collect();

    let mut sizes = vec![0usize; n];
    sizes[me] = own.len();
    let mut maybe_err = None;
    for (p, h) in recv_sizes {
        match h.wait() {
            Some(data) => match decode_records::<WireLen>(&data, p) {
                Ok(v) if v.len() == 1 => sizes[p] = v[0].get(),
                Ok(_) => {
                    maybe_err.get_or_insert(MatrixError::Comm {
                        neighbor: p,
                        message: "expected a single size header".into(),
                    });
                }
                Err(e) => {
                    maybe_err.get_or_insert(e);
                }
            },
            None => {
                maybe_err.get_or_insert(MatrixError::Comm {
                    neighbor: p,
                    message: format!("failed to receive size from rank {p}"),
                });
            }
        }
    }
    for s in sends {
        let _ = s.wait();
    }

    // 2) payloads, posted even after a failed size phase: peers that got our
    // size are already waiting for the data
    let data_tag = tag.offset(1).as_u16();
    let recv_data: Vec<(usize, C::RecvHandle)> = peers
        .iter()
        .map(|&p| {
            let mut buf = vec![0u8; sizes[p]];
            (p, comm.irecv(p, data_tag, &mut buf))
        })
        .collect();
    let sends: Vec<C::SendHandle> = peers
        .iter()
        .map(|&p| comm.isend(p, data_tag, payload(p)))
        .collect();

    let mut out: Vec<Vec<u8>> = vec![Vec::new(); n];
    out[me] = own.to_vec();
    for (p, h) in recv_data {
        match h.wait() {
            Some(data) if data.len() == sizes[p] => out[p] = data,
            Some(data) => {
                maybe_err.get_or_insert(MatrixError::Comm {
                    neighbor: p,
                    message: format!("expected {} bytes, got {}", sizes[p], data.len()),
                });
            }
            // A serial communicator delivers nothing; only legal for empty payloads.
            None if sizes[p] == 0 => {}
            None => {
                maybe_err.get_or_insert(MatrixError::Comm {
                    neighbor: p,
                    message: format!("failed to receive payload from rank {p}"),
                });
            }
        }
    }
    for s in sends {
        let _ = s.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

/// Gather a slice of POD records from every rank.
pub fn all_gather_pod<T, C>(comm: &C, tag: CommTag, local: &[T]) -> Result<Vec<Vec<T>>, MatrixError>
where
    T: Pod,
    C: Communicator + ?Sized,
{
    comm.all_gather_bytes(tag, cast_slice(local))?
        .iter()
        .enumerate()
        .map(|(rank, bytes)| decode_records::<T>(bytes, rank))
        .collect()
}

/// Send `outgoing[p]` to rank `p`; see [`all_to_all_bytes_p2p`].
pub fn all_to_all_pod<T, C>(
    comm: &C,
    tag: CommTag,
    outgoing: &[Vec<T>],
) -> Result<Vec<Vec<T>>, MatrixError>
where
    T: Pod,
    C: Communicator + ?Sized,
{
    let bytes: Vec<Vec<u8>> = outgoing.iter().map(|v| cast_slice(v).to_vec()).collect();
    all_to_all_bytes_p2p(comm, tag, &bytes)?
        .iter()
        .enumerate()
        .map(|(rank, b)| decode_records::<T>(b, rank))
        .collect()
}

/// Gather one integer from every rank.
pub fn all_gather_u64<C>(comm: &C, tag: CommTag, value: u64) -> Result<Vec<u64>, MatrixError>
where
    C: Communicator + ?Sized,
{
    let per_rank = all_gather_pod(comm, tag, &[WireU64::of(value)])?;
    per_rank
        .into_iter()
        .enumerate()
        .map(|(rank, v)| match v.as_slice() {
            [x] => Ok(x.get()),
            _ => Err(MatrixError::Comm {
                neighbor: rank,
                message: format!("expected one value, got {}", v.len()),
            }),
        })
        .collect()
}

/// Sum of one integer over all ranks.
pub fn all_reduce_sum_u64<C>(comm: &C, tag: CommTag, value: u64) -> Result<u64, MatrixError>
where
    C: Communicator + ?Sized,
{
    Ok(all_gather_u64(comm, tag, value)?.into_iter().sum())
}

/// Sum of one float over all ranks.
///
/// Contributions are added in rank order, so every rank obtains the
/// bit-identical result.
pub fn all_reduce_sum_f64<C>(comm: &C, tag: CommTag, value: f64) -> Result<f64, MatrixError>
where
    C: Communicator + ?Sized,
{
    let per_rank = all_gather_pod(comm, tag, &[WireF64::of(value)])?;
    let mut sum = 0.0;
    for (rank, v) in per_rank.iter().enumerate() {
        match v.as_slice() {
            [x] => sum += x.get(),
            _ => {
                return Err(MatrixError::Comm {
                    neighbor: rank,
                    message: format!("expected one value, got {}", v.len()),
                });
            }
        }
    }
    Ok(sum)
}

/// Logical AND of a flag over all ranks.
pub fn all_reduce_and<C>(comm: &C, tag: CommTag, flag: bool) -> Result<bool, MatrixError>
where
    C: Communicator + ?Sized,
{
    Ok(all_gather_u64(comm, tag, flag as u64)?
        .into_iter()
        .all(|v| v != 0))
}

/// Make a local outcome collective.
///
/// Every rank learns whether all ranks succeeded. A rank whose own `local`
/// failed gets its error back; the others get
/// [`MatrixError::RemotePrecondition`] naming the lowest failing rank.
pub fn agree<T, C>(comm: &C, tag: CommTag, local: Result<T, MatrixError>) -> Result<T, MatrixError>
where
    C: Communicator + ?Sized,
{
    let flags = all_gather_u64(comm, tag, local.is_ok() as u64)?;
    let value = local?;
    match flags.iter().position(|&f| f == 0) {
        Some(rank) => Err(MatrixError::RemotePrecondition { rank }),
        None => Ok(value),
    }
}

/// Block until every rank has reached this point.
pub fn barrier<C>(comm: &C, tag: CommTag) -> Result<(), MatrixError>
where
    C: Communicator + ?Sized,
{
    comm.all_gather_bytes(tag, &[]).map(|_| ())
}
