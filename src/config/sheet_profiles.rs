// ==========================================
// 工作簿 ETL - 工作表路由规则表
// ==========================================
// 职责: 工作表名模式 → 目标集合 / 跳过标记 / 表头覆写
// 匹配: 模式为表名子串即命中；多条命中时最长模式优先
// 并列: 长度相同按声明顺序（排序为稳定排序）
// ==========================================

use crate::domain::sheet::SheetProfile;
use crate::domain::types::Collection;
use std::cmp::Reverse;
use tracing::debug;

pub struct SheetProfileRegistry {
    profiles: Vec<SheetProfile>, // 已按模式长度降序排列
}

impl SheetProfileRegistry {
    /// 由规则列表构建（声明顺序即并列时的优先顺序）
    pub fn new(mut profiles: Vec<SheetProfile>) -> Self {
        profiles.sort_by_key(|p| Reverse(p.pattern_len()));
        Self { profiles }
    }

    /// 内置规则表
    pub fn builtin() -> Self {
        Self::new(builtin_profiles())
    }

    pub fn profiles(&self) -> &[SheetProfile] {
        &self.profiles
    }

    /// 查找工作表对应的规则
    pub fn find_profile(&self, sheet_name: &str) -> Option<&SheetProfile> {
        let mut matches = self
            .profiles
            .iter()
            .filter(|p| !p.name_pattern.is_empty() && sheet_name.contains(&p.name_pattern));

        let best = matches.next()?;
        if let Some(tied) = matches.find(|p| p.pattern_len() == best.pattern_len()) {
            debug!(
                sheet = sheet_name,
                chosen = %best.name_pattern,
                tied = %tied.name_pattern,
                "规则长度相同，按声明顺序取先声明者"
            );
        }
        Some(best)
    }
}

impl Default for SheetProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_profiles() -> Vec<SheetProfile> {
    vec![
        // ===== 说明/汇总页（跳过） =====
        SheetProfile::skipped("작성요령", "작성 가이드 시트"),
        SheetProfile::skipped("작성가이드", "작성 가이드 시트"),
        SheetProfile::skipped("목차", "목차 시트"),
        SheetProfile::skipped("표지", "표지 시트"),
        SheetProfile::skipped("대시보드", "수식 기반 요약 시트"),
        SheetProfile::skipped("요약", "수식 기반 요약 시트"),
        SheetProfile::skipped("코드표", "코드 정의 시트"),
        SheetProfile::skipped("예산총괄", "예산 총괄표 (사업별 예산 시트에서 집계)"),
        // ===== 사업/예산 =====
        SheetProfile::new("사업목록", Collection::Projects).with_hint("사업 1행 = 1문서"),
        SheetProfile::new("프로젝트", Collection::Projects).with_hint("사업 1행 = 1문서"),
        SheetProfile::new("사업현황", Collection::Projects)
            .with_header_rows(2)
            .with_hint("2단 헤더: 상단은 계약/정산 그룹명"),
        SheetProfile::new("예산", Collection::Projects)
            .with_header_rows(2)
            .with_hint("예산 내역 행은 사업명 없이 비목/세목/세세목과 예산액만 존재"),
        // ===== 거래/집행 내역 =====
        SheetProfile::new("통장내역", Collection::Transactions)
            .with_hint("통장 거래내역: 입금/출금/잔액"),
        SheetProfile::new("카드내역", Collection::Transactions)
            .with_hint("법인카드 승인 내역, 결제수단은 법인카드"),
        SheetProfile::new("사용내역", Collection::Transactions)
            .with_hint("사업비 집행 내역: 공급가액/부가세 분리"),
        SheetProfile::new("사용내역(통장내역기준취소내역,불인정포함)", Collection::Transactions)
            .with_header_start(3)
            .with_hint("상단 2행은 안내문; 취소/불인정 건 포함, 음수 금액은 정정 내역"),
        SheetProfile::new("주간집행", Collection::Transactions)
            .with_hint("주차 코드(YY-M-W) 기준 집계, 일자 없음"),
        // ===== 참여 인력 =====
        SheetProfile::new("참여인력", Collection::Members).with_hint("인력 1행 = 1문서"),
        SheetProfile::new("인력현황", Collection::Members)
            .with_header_start(2)
            .with_hint("1행은 기준일 안내문"),
    ]
}
