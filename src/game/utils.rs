use chess::{BitBoard, Board, BoardStatus, ChessMove, Color, File, MoveGen, Piece, Square};
use std::str::FromStr;

use crate::error::ServiceError;
use crate::models::{EndReason, GameResult, PlayerColor};

pub const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

impl From<PlayerColor> for Color {
    fn from(color: PlayerColor) -> Self {
        match color {
            PlayerColor::White => Color::White,
            PlayerColor::Black => Color::Black,
        }
    }
}

impl From<Color> for PlayerColor {
    fn from(color: Color) -> Self {
        match color {
            Color::White => PlayerColor::White,
            Color::Black => PlayerColor::Black,
        }
    }
}

/// Parse a starting FEN, defaulting to the standard position.
pub fn parse_position(fen: Option<&str>) -> Result<(Board, String), ServiceError> {
    let fen = fen.map(str::trim).filter(|f| !f.is_empty()).unwrap_or(STANDARD_START_FEN);
    let board = Board::from_str(fen)
        .map_err(|e| ServiceError::InvalidRequest(format!("invalid starting position: {e}")))?;
    Ok((board, fen.to_string()))
}

pub fn board_side_to_move(board: &Board) -> PlayerColor {
    board.side_to_move().into()
}

pub fn parse_square(square: &str) -> Result<Square, ServiceError> {
    Square::from_str(&square.trim().to_lowercase())
        .map_err(|_| ServiceError::InvalidMove(format!("unknown square {square:?}")))
}

pub fn parse_promotion(piece: &str) -> Result<Piece, ServiceError> {
    match piece.trim().to_lowercase().as_str() {
        "q" | "queen" => Ok(Piece::Queen),
        "r" | "rook" => Ok(Piece::Rook),
        "b" | "bishop" => Ok(Piece::Bishop),
        "n" | "knight" => Ok(Piece::Knight),
        other => Err(ServiceError::InvalidMove(format!("unknown promotion piece {other:?}"))),
    }
}

/// Builds the move and its UCI text from client squares.
pub fn build_move(from: &str, to: &str, promotion: Option<&str>) -> Result<(ChessMove, String), ServiceError> {
    let source = parse_square(from)?;
    let dest = parse_square(to)?;
    let piece = promotion.map(parse_promotion).transpose()?;
    let chess_move = ChessMove::new(source, dest, piece);
    Ok((chess_move, chess_move.to_string()))
}

/// Applies a move to the tracked board if the board accepts it.
pub fn apply_tracked(board: &Board, chess_move: ChessMove) -> Option<Board> {
    board.legal(chess_move).then(|| board.make_move_new(chess_move))
}

fn file_char(square: Square) -> char {
    (b'a' + square.get_file().to_index() as u8) as char
}

fn rank_char(square: Square) -> char {
    (b'1' + square.get_rank().to_index() as u8) as char
}

fn piece_letter(piece: Piece) -> &'static str {
    match piece {
        Piece::Pawn => "",
        Piece::Knight => "N",
        Piece::Bishop => "B",
        Piece::Rook => "R",
        Piece::Queen => "Q",
        Piece::King => "K",
    }
}

/// Standard algebraic notation of a legal move on `board`.
pub fn san(board: &Board, chess_move: ChessMove) -> Option<String> {
    let source = chess_move.get_source();
    let dest = chess_move.get_dest();
    let piece = board.piece_on(source)?;

    let mut text = String::new();
    let file_distance = source.get_file().to_index() as i32 - dest.get_file().to_index() as i32;
    if piece == Piece::King && file_distance.abs() == 2 {
        text.push_str(if dest.get_file() == File::G { "O-O" } else { "O-O-O" });
    } else {
        let capture = board.piece_on(dest).is_some() || (piece == Piece::Pawn && file_distance != 0);
        if piece == Piece::Pawn {
            if capture {
                text.push(file_char(source));
            }
        } else {
            text.push_str(piece_letter(piece));
            let rivals: Vec<Square> = MoveGen::new_legal(board)
                .filter(|m| m.get_dest() == dest && m.get_source() != source)
                .map(|m| m.get_source())
                .filter(|s| board.piece_on(*s) == Some(piece))
                .collect();
            if !rivals.is_empty() {
                if rivals.iter().all(|s| s.get_file() != source.get_file()) {
                    text.push(file_char(source));
                } else if rivals.iter().all(|s| s.get_rank() != source.get_rank()) {
                    text.push(rank_char(source));
                } else {
                    text.push(file_char(source));
                    text.push(rank_char(source));
                }
            }
        }
        if capture {
            text.push('x');
        }
        text.push_str(&dest.to_string());
        if let Some(promotion) = chess_move.get_promotion() {
            text.push('=');
            text.push_str(piece_letter(promotion));
        }
    }

    let after = board.make_move_new(chess_move);
    match after.status() {
        BoardStatus::Checkmate => text.push('#'),
        _ if after.checkers().popcnt() > 0 => text.push('+'),
        _ => {}
    }
    Some(text)
}

/// Terminal outcome of a position reached by `mover`, if any.
pub fn position_outcome(board: &Board, mover: PlayerColor) -> Option<(GameResult, EndReason)> {
    match board.status() {
        BoardStatus::Checkmate => Some((GameResult::win_for(mover), EndReason::Checkmate)),
        BoardStatus::Stalemate => Some((GameResult::Draw, EndReason::Stalemate)),
        BoardStatus::Ongoing if has_insufficient_material(board) => {
            Some((GameResult::Draw, EndReason::InsufficientMaterial))
        }
        BoardStatus::Ongoing => None,
    }
}

fn count(board: &Board, color: Color, piece: Piece) -> u32 {
    (*board.pieces(piece) & *board.color_combined(color)).popcnt()
}

fn light_square(square: Square) -> bool {
    (square.get_rank().to_index() + square.get_file().to_index()) % 2 == 1
}

/// Check if the board has insufficient material for checkmate
pub fn has_insufficient_material(board: &Board) -> bool {
    let heavy_or_pawns = *board.pieces(Piece::Pawn) | *board.pieces(Piece::Rook) | *board.pieces(Piece::Queen);
    if heavy_or_pawns != BitBoard::new(0) {
        return false;
    }

    let minors = |color| count(board, color, Piece::Knight) + count(board, color, Piece::Bishop);
    let (white_minors, black_minors) = (minors(Color::White), minors(Color::Black));

    // King vs king, or king and a single minor piece vs king
    if white_minors + black_minors <= 1 {
        return true;
    }

    // King and bishop vs king and bishop with both bishops on the same square colour
    if count(board, Color::White, Piece::Bishop) == 1
        && count(board, Color::Black, Piece::Bishop) == 1
        && white_minors == 1
        && black_minors == 1
    {
        let mut bishops = *board.pieces(Piece::Bishop);
        if let (Some(a), Some(b)) = (bishops.next(), bishops.next()) {
            return light_square(a) == light_square(b);
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board(fen: &str) -> Board {
        Board::from_str(fen).unwrap()
    }

    #[test]
    fn default_position_is_standard() {
        let (board, fen) = parse_position(None).unwrap();
        assert_eq!(fen, STANDARD_START_FEN);
        assert_eq!(board_side_to_move(&board), PlayerColor::White);
    }

    #[test]
    fn build_move_renders_uci() {
        let (_, uci) = build_move("E2", "e4", None).unwrap();
        assert_eq!(uci, "e2e4");
        let (_, uci) = build_move("e7", "e8", Some("q")).unwrap();
        assert_eq!(uci, "e7e8q");
        assert!(matches!(build_move("z9", "e4", None), Err(ServiceError::InvalidMove(_))));
        assert!(matches!(build_move("e7", "e8", Some("k")), Err(ServiceError::InvalidMove(_))));
    }

    #[test]
    fn untrackable_move_is_not_applied() {
        let (start, _) = parse_position(None).unwrap();
        let (illegal, _) = build_move("e2", "e5", None).unwrap();
        assert!(apply_tracked(&start, illegal).is_none());
        let (legal, _) = build_move("e2", "e4", None).unwrap();
        assert!(apply_tracked(&start, legal).is_some());
    }

    fn san_of(fen: &str, from: &str, to: &str, promotion: Option<&str>) -> String {
        let (chess_move, _) = build_move(from, to, promotion).unwrap();
        san(&board(fen), chess_move).unwrap()
    }

    #[test]
    fn san_covers_common_shapes() {
        assert_eq!(san_of(STANDARD_START_FEN, "e2", "e4", None), "e4");
        assert_eq!(san_of(STANDARD_START_FEN, "g1", "f3", None), "Nf3");
        // White to move after 1.e4 d5: exd5.
        let scandi = "rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2";
        assert_eq!(san_of(scandi, "e4", "d5", None), "exd5");
        // Kingside castling.
        let castle = "r1bqk1nr/pppp1ppp/2n5/2b1p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4";
        assert_eq!(san_of(castle, "e1", "g1", None), "O-O");
        // Knights on b1 and f3 can both reach d2.
        let twins = "rnbqkbnr/pppppppp/8/8/8/3P1N2/PPP1PPPP/RNBQKB1R w KQkq - 0 1";
        assert_eq!(san_of(twins, "b1", "d2", None), "Nbd2");
        assert_eq!(san_of("8/4P3/8/8/8/8/k7/4K3 w - - 0 1", "e7", "e8", Some("q")), "e8=Q");
        let fools = "rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2";
        assert_eq!(san_of(fools, "d8", "h4", None), "Qh4#");
    }

    #[test]
    fn detects_checkmate_for_mover() {
        // Fool's mate, black has just delivered mate.
        let mated = board("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3");
        assert_eq!(
            position_outcome(&mated, PlayerColor::Black),
            Some((GameResult::BlackWins, EndReason::Checkmate))
        );
    }

    #[test]
    fn insufficient_material_cases() {
        assert!(has_insufficient_material(&board("8/8/8/4k3/8/8/8/4K3 w - - 0 1")));
        assert!(has_insufficient_material(&board("8/8/8/4k3/8/8/8/3NK3 w - - 0 1")));
        // Bishops on c1 (dark) and f8 (dark).
        assert!(has_insufficient_material(&board("5b2/8/8/4k3/8/8/8/2B1K3 w - - 0 1")));
        // Bishops on c1 (dark) and c8 (light).
        assert!(!has_insufficient_material(&board("2b5/8/8/4k3/8/8/8/2B1K3 w - - 0 1")));
        assert!(!has_insufficient_material(&board("8/8/8/4k3/8/8/4P3/4K3 w - - 0 1")));
    }
}
