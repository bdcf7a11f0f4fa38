//! Multi-record response parsing (§4.8): the group parser shared by batch, scan and
//! query commands once a connection has sent its request and is reading framed
//! record groups back.

use crate::cmap::Connection;
use crate::error::{Error, Result, ResultCode};
use crate::wire::record::{parse_fields, parse_ops, RecordHeader, RECORD_HEADER_LEN};
use crate::wire::{Header, HEADER_LEN};

use super::Record;

/// One parsed group from a multi-record response.
#[derive(Debug)]
pub enum GroupOutcome {
    /// An ordinary record; `is_last` mirrors the group's `info3.LAST` bit.
    Record {
        record: Record,
        is_last: bool,
    },
    /// A per-partition terminator (§4.8): `generation` is overloaded to carry the
    /// partition id. A non-OK `result_code` means the partition tracker should mark
    /// this partition UNAVAILABLE for retry next round.
    PartitionDone {
        partition_id: u16,
        result_code: ResultCode,
        is_last: bool,
    },
    /// A zero-length frame: the response stream ends with no further groups.
    End,
}

/// Reads and parses exactly one group (one 8-byte frame header plus its body) from
/// `conn`. Callers loop on this until [`GroupOutcome::End`] or a group whose
/// `is_last()` is true.
pub async fn read_group(conn: &mut Connection) -> Result<GroupOutcome> {
    let mut header_buf = [0u8; HEADER_LEN];
    conn.recv(&mut header_buf).await?;
    let header = Header::from_bytes(&header_buf)?;

    if header.is_compressed() {
        return Err(Error::internal(
            "compressed multi-record groups are not supported by this layer",
        ));
    }

    if header.size == 0 {
        return Ok(GroupOutcome::End);
    }

    let mut body = vec![0u8; header.size as usize];
    conn.recv(&mut body).await?;

    if body.len() < RECORD_HEADER_LEN {
        return Err(Error::internal("multi-record group shorter than its header"));
    }

    let record_header = RecordHeader::parse(&body)?;
    let is_last = record_header.is_last();

    if record_header.is_partition_done() {
        return Ok(GroupOutcome::PartitionDone {
            partition_id: record_header.partition_id(),
            result_code: ResultCode::from_u8(record_header.result_code),
            is_last,
        });
    }

    let rest = &body[RECORD_HEADER_LEN..];
    let (fields, consumed) = parse_fields(rest, record_header.field_count)?;
    let (ops, _) = parse_ops(&rest[consumed..], record_header.op_count)?;
    let _ = fields; // field payloads (namespace/digest/etc.) are opaque to this layer.

    Ok(GroupOutcome::Record {
        record: Record::from_wire(&record_header, &ops),
        is_last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmap::NodeConnectionPool;
    use crate::options::ClientPolicy;
    use crate::wire::record::Info3;
    use crate::wire::FrameType;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn op_entry(name: &str, particle_type: u8, particle: &[u8]) -> Vec<u8> {
        let op_size = 4 + name.len() + particle.len();
        let mut buf = Vec::new();
        buf.extend_from_slice(&(op_size as u32).to_be_bytes());
        buf.push(0); // op_type
        buf.push(particle_type);
        buf.push(0); // version
        buf.push(name.len() as u8);
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(particle);
        buf
    }

    fn record_group(info3: Info3, op_count: u16, ops: &[u8]) -> Vec<u8> {
        let mut record = vec![0u8; RECORD_HEADER_LEN];
        record[3] = info3.bits();
        record[20..22].copy_from_slice(&op_count.to_be_bytes());
        record.extend_from_slice(ops);
        let header = Header::new(FrameType::Message, 0, record.len() as u64).unwrap();
        let mut buf = header.to_bytes().to_vec();
        buf.extend_from_slice(&record);
        buf
    }

    fn partition_done_group(partition_id: u16, result_code: u8, is_last: bool) -> Vec<u8> {
        let mut record = vec![0u8; RECORD_HEADER_LEN];
        let mut info3 = Info3::PARTITION_DONE;
        if is_last {
            info3 |= Info3::LAST;
        }
        record[3] = info3.bits();
        record[5] = result_code;
        record[6..10].copy_from_slice(&(partition_id as u32).to_be_bytes());
        let header = Header::new(FrameType::Message, 0, record.len() as u64).unwrap();
        let mut buf = header.to_bytes().to_vec();
        buf.extend_from_slice(&record);
        buf
    }

    async fn server_sending(body: Vec<u8>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&body).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        addr
    }

    #[tokio::test]
    async fn reads_a_plain_record_group() {
        let op = op_entry("bin1", 3, &[9, 9]);
        let body = record_group(Info3::LAST, 1, &op);
        let addr = server_sending(body).await;
        let pool = NodeConnectionPool::new(addr, &ClientPolicy::default());
        let mut conn = pool.checkout().await.unwrap();

        match read_group(&mut conn).await.unwrap() {
            GroupOutcome::Record { record, is_last } => {
                assert!(is_last);
                assert_eq!(record.bins.len(), 1);
                assert_eq!(record.bins[0].name, "bin1");
            }
            other => panic!("expected a record group, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reads_a_partition_done_marker() {
        let body = partition_done_group(17, 0, false);
        let addr = server_sending(body).await;
        let pool = NodeConnectionPool::new(addr, &ClientPolicy::default());
        let mut conn = pool.checkout().await.unwrap();

        match read_group(&mut conn).await.unwrap() {
            GroupOutcome::PartitionDone {
                partition_id,
                result_code,
                is_last,
            } => {
                assert_eq!(partition_id, 17);
                assert_eq!(result_code, ResultCode::Ok);
                assert!(!is_last);
            }
            other => panic!("expected a partition-done group, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_length_frame_ends_the_stream() {
        let header = Header::new(FrameType::Message, 0, 0).unwrap();
        let addr = server_sending(header.to_bytes().to_vec()).await;
        let pool = NodeConnectionPool::new(addr, &ClientPolicy::default());
        let mut conn = pool.checkout().await.unwrap();

        match read_group(&mut conn).await.unwrap() {
            GroupOutcome::End => {}
            other => panic!("expected End, got {other:?}"),
        }
    }
}
