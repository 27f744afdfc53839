use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const HEADER_LEN: usize = 27;
const FLAG_CONTINUED: u8 = 0x01;

/// Incremental Ogg packet reader over the transcoder's stdout.
///
/// Pages are consumed one at a time; lacing runs are assembled into whole
/// codec packets, including packets continued across page boundaries.
/// Leading pages with a zero granule position (codec header and comment
/// pages) are discarded so only audio packets come out.
pub(crate) struct PacketReader<R> {
    input: R,
    ready: std::collections::VecDeque<Vec<u8>>,
    partial: Vec<u8>,
    started: bool,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            ready: std::collections::VecDeque::new(),
            partial: Vec::new(),
            started: false,
        }
    }

    /// The next complete codec packet, or `None` at end of stream.
    pub async fn next_packet(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                return Ok(Some(packet));
            }
            if !self.read_page().await? {
                return Ok(None);
            }
        }
    }

    /// Reads one page into `ready`/`partial`. Returns false on a clean EOF
    /// at a page boundary.
    async fn read_page(&mut self) -> Result<bool> {
        let mut header = [0u8; HEADER_LEN];
        if !read_exact_or_eof(&mut self.input, &mut header).await? {
            return Ok(false);
        }
        if &header[0..4] != CAPTURE_PATTERN {
            return Err(Error::MalformedStream);
        }
        let flags = header[5];
        let granule = u64::from_le_bytes(
            header[6..14].try_into().map_err(|_| Error::MalformedStream)?,
        );

        let mut lacing = vec![0u8; header[26] as usize];
        self.input.read_exact(&mut lacing).await?;
        let body_len: usize = lacing.iter().map(|&l| l as usize).sum();
        let mut body = vec![0u8; body_len];
        self.input.read_exact(&mut body).await?;

        // A fresh (non-continued) page invalidates any dangling partial
        // packet from a dropped continuation.
        if flags & FLAG_CONTINUED == 0 {
            self.partial.clear();
        }

        if !self.started {
            if granule == 0 {
                self.partial.clear();
                return Ok(true);
            }
            self.started = true;
        }

        let mut offset = 0;
        for &l in &lacing {
            self.partial.extend_from_slice(&body[offset..offset + l as usize]);
            offset += l as usize;
            if l < 255 {
                self.ready.push_back(std::mem::take(&mut self.partial));
            }
        }
        Ok(true)
    }
}

/// Fills `buf` completely, or returns false when the stream ends before the
/// first byte. EOF partway through is an error.
async fn read_exact_or_eof<R: AsyncRead + Unpin>(input: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a raw page from explicit lacing values and body bytes.
    fn page(flags: u8, granule: u64, lacing: &[u8], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(CAPTURE_PATTERN);
        out.push(0); // version
        out.push(flags);
        out.extend_from_slice(&granule.to_le_bytes());
        out.extend_from_slice(&[0u8; 12]); // serial, sequence, checksum
        out.push(lacing.len() as u8);
        out.extend_from_slice(lacing);
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn skips_leading_zero_granule_pages() {
        let mut data = page(0, 0, &[8], b"OpusHead");
        data.extend(page(0, 0, &[8], b"OpusTags"));
        data.extend(page(0, 960, &[3, 2], b"abcde"));

        let mut reader = PacketReader::new(data.as_slice());
        assert_eq!(reader.next_packet().await.unwrap().unwrap(), b"abc");
        assert_eq!(reader.next_packet().await.unwrap().unwrap(), b"de");
        assert!(reader.next_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn assembles_lacing_runs_into_one_packet() {
        let body: Vec<u8> = (0..300).map(|i| i as u8).collect();
        let data = page(0, 960, &[255, 45], &body);

        let mut reader = PacketReader::new(data.as_slice());
        assert_eq!(reader.next_packet().await.unwrap().unwrap(), body);
        assert!(reader.next_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn continues_packets_across_pages() {
        let first: Vec<u8> = vec![1; 255];
        let second: Vec<u8> = vec![2; 10];
        let mut data = page(0, 960, &[255], &first);
        data.extend(page(FLAG_CONTINUED, 1920, &[10], &second));

        let mut reader = PacketReader::new(data.as_slice());
        let packet = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(packet.len(), 265);
        assert_eq!(&packet[..255], first.as_slice());
        assert_eq!(&packet[255..], second.as_slice());
    }

    #[tokio::test]
    async fn rejects_bad_capture_pattern() {
        let data = b"NotAnOggPageAtAll..........................".to_vec();
        let mut reader = PacketReader::new(data.as_slice());
        assert!(matches!(
            reader.next_packet().await,
            Err(Error::MalformedStream)
        ));
    }

    #[tokio::test]
    async fn truncated_page_is_an_error() {
        let mut data = page(0, 960, &[100], &[0u8; 100]);
        data.truncate(data.len() - 40);
        let mut reader = PacketReader::new(data.as_slice());
        assert!(reader.next_packet().await.is_err());
    }
}
